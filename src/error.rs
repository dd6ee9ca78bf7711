use crate::database::DbError;
use crate::tmdb::GatewayError;
use actix_web::{http::header, http::StatusCode, HttpResponse, ResponseError};
use log::debug;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("username is already taken")]
    DuplicateUser,
    #[error("user does not exist")]
    UnknownUser,
    #[error("wrong password")]
    WrongPassword,
    #[error("required fields are missing")]
    MissingFields,
    #[error("not logged in")]
    Unauthenticated,
    #[error("movie not found")]
    NotFound,
    #[error("movie {0:?} is already in the list")]
    DuplicateTitle(String),
    #[error("movie database unavailable: {0}")]
    UpstreamUnavailable(#[from] GatewayError),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Hash(#[from] bcrypt::BcryptError),
}

impl Error {
    /// The flash message shown on the form the user is sent back to.
    pub fn flash_key(&self) -> Option<&'static str> {
        match self {
            Error::DuplicateUser => Some("duplicate_user"),
            Error::UnknownUser => Some("unknown_user"),
            Error::WrongPassword => Some("wrong_password"),
            Error::MissingFields => Some("missing_fields"),
            _ => None,
        }
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::DuplicateUser
            | Error::UnknownUser
            | Error::WrongPassword
            | Error::MissingFields => StatusCode::BAD_REQUEST,
            Error::Unauthenticated => StatusCode::FOUND,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::DuplicateTitle(_) => StatusCode::CONFLICT,
            Error::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Database(_) | Error::Hash(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        debug!("{:?}", self);
        let body = match self {
            Error::Unauthenticated => {
                return HttpResponse::Found()
                    .insert_header((header::LOCATION, "/login"))
                    .finish()
            }
            Error::NotFound => "Movie not found".to_owned(),
            Error::DuplicateTitle(title) => format!("{} is already in your list", title),
            Error::UpstreamUnavailable(_) => {
                "Movie search is unavailable, please try again.".to_owned()
            }
            Error::Database(_) | Error::Hash(_) => "Internal server error".to_owned(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(body)
    }
}
