//! Data models for the sign-in client

pub mod auth;

pub use auth::{
    ApiEnvelope, AuthSession, AuthTokens, Challenge, ErrorBody, LoginRequest, LoginResponse,
    NonceRequest, NonceResponse,
};
