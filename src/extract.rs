//! Request extractors whose rejections are [`PortalError`]s, so malformed requests get the same
//! JSON error body and status mapping as every other failure.

use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::PortalError;

/// JSON request body, and JSON response.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(PortalError))]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(PortalError))]
pub struct Path<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(PortalError))]
pub struct Query<T>(pub T);

/// A UTF-8 text body, such as an uploaded CSV roster.
pub struct Text(pub String);

impl<S> FromRequest<S> for Text
where
    S: Send + Sync,
{
    type Rejection = PortalError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(String::from_request(req, state).await?))
    }
}
