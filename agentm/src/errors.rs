use crate::multierror::MultiError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {

    /* encapsulate a kube-rust error */
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /* a builder failed to produce its object, as opposed to declining to */
    #[error("builder `{component}` failed: {message}")]
    Builder {
	component: String,
	message: String,
    },

    #[error("object is missing `{0}`")]
    MissingField(&'static str),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("caught panic: {0}")]
    Panic(String),

    #[error("{0}")]
    Multi(MultiError),
}

impl Error {

    pub fn builder(component: &str, message: impl Into<String>) -> Self {
	Error::Builder {
	    component: component.to_string(),
	    message: message.into(),
	}
    }

    fn api_code(&self) -> Option<u16> {
	match self {
	    Error::Kube(kube::Error::Api(response)) => Some(response.code),
	    _ => None,
	}
    }

    pub fn is_not_found(&self) -> bool {
	self.api_code() == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
	self.api_code() == Some(409)
    }

    /*
     * Number of underlying failures, counting every entry of an aggregate.
     */
    pub fn count(&self) -> usize {
	match self {
	    Error::Multi(multi) => multi.errors().len(),
	    _ => 1,
	}
    }
}

/*
 * Maps a NotFound answer to `None`, passing every other outcome through.
 */
pub fn ignore_not_found<T>(result: Result<T, Error>) -> Result<Option<T>, Error> {
    match result {
	Ok(value) => Ok(Some(value)),
	Err(err) if err.is_not_found() => Ok(None),
	Err(err) => Err(err),
    }
}

#[cfg(test)]
pub fn api_error(code: u16, reason: &str) -> Error {
    Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
	status: String::from("Failure"),
	message: format!("{} ({})", reason, code),
	reason: reason.to_string(),
	code,
    }))
}
