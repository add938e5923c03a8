use crate::errors::PaymentError;
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    Error, FromRequest, HttpMessage, HttpRequest,
};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};
use std::rc::Rc;

/// Claims issued by the auth service; `user_id` is the landlord id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub iat: usize,
    pub exp: usize,
}

pub struct JwtAuth {
    secret: Rc<String>,
}

impl JwtAuth {
    pub fn new(secret: String) -> Self {
        Self {
            secret: Rc::new(secret),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthMiddleware {
            service: Rc::new(service),
            secret: self.secret.clone(),
        }))
    }
}

pub struct JwtAuthMiddleware<S> {
    service: Rc<S>,
    secret: Rc<String>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = req
            .headers()
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty());

        let Some(token) = token else {
            return unauthorized();
        };

        let validation = Validation::new(Algorithm::HS256);

        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        ) {
            Ok(token_data) if token_data.claims.user_id > 0 => {
                req.extensions_mut().insert(token_data.claims);

                let fut = self.service.call(req);
                Box::pin(async move { fut.await })
            }
            Ok(_) => {
                tracing::warn!("JWT carries no landlord id");
                unauthorized()
            }
            Err(err) => {
                tracing::warn!("JWT validation failed: {:?}", err);
                unauthorized()
            }
        }
    }
}

fn unauthorized<B: 'static>() -> LocalBoxFuture<'static, Result<ServiceResponse<B>, Error>> {
    Box::pin(ready(Err(PaymentError::Unauthorized.into())))
}

/// Authenticated landlord, taken from the claims the middleware attached
#[derive(Debug, Clone)]
pub struct LandlordIdentity {
    pub landlord_id: i64,
}

impl FromRequest for LandlordIdentity {
    type Error = PaymentError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let identity = req
            .extensions()
            .get::<Claims>()
            .map(|claims| LandlordIdentity {
                landlord_id: claims.user_id,
            })
            .ok_or(PaymentError::Unauthorized);

        ready(identity)
    }
}
