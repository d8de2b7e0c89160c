use crate::errors::Error;

use std::fmt;

/*
 * MultiError collects every failure of a batch of independent operations so
 * that a single reconcile reports all of them instead of the first one.
 */
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<Error>,
}

impl MultiError {

    pub fn errors(&self) -> &[Error] {
	&self.errors
    }

    pub fn into_errors(self) -> Vec<Error> {
	self.errors
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	match self.errors.as_slice() {
	    [] => write!(f, "no errors"),
	    [single] => write!(f, "{}", single),
	    errors => {
		write!(f, "multiple errors:")?;
		for err in errors {
		    write!(f, "\n  {}", err)?;
		}
		Ok(())
	    }
	}
    }
}

impl std::error::Error for MultiError {}

#[derive(Debug, Default)]
pub struct MultiErrorBuilder {
    errors: Vec<Error>,
}

impl MultiErrorBuilder {

    pub fn new() -> Self {
	Self::default()
    }

    /*
     * Records the failure of `result`, if any, and hands back the success value.
     */
    pub fn add<T>(&mut self, result: Result<T, Error>) -> Option<T> {
	match result {
	    Ok(value) => Some(value),
	    Err(err) => {
		self.add_err(err);
		None
	    }
	}
    }

    pub fn add_err(&mut self, err: Error) {
	match err {
	    Error::Multi(multi) => self.errors.extend(multi.into_errors()),
	    err => self.errors.push(err),
	}
    }

    pub fn build(self) -> Result<(), Error> {
	if self.errors.is_empty() {
	    return Ok(());
	}
	Err(self.into_error())
    }

    fn into_error(self) -> Error {
	Error::Multi(MultiError { errors: self.errors })
    }
}

/*
 * Combines the outcome of a reconcile with a secondary failure (e.g. status
 * publication), keeping the primary value when only the primary succeeded.
 */
pub fn merge<T>(primary: Result<T, Error>, secondary: Result<(), Error>) -> Result<T, Error> {
    match (primary, secondary) {
	(primary, Ok(())) => primary,
	(Ok(_), Err(err)) => Err(err),
	(Err(first), Err(second)) => {
	    let mut errors = MultiErrorBuilder::new();
	    errors.add_err(first);
	    errors.add_err(second);
	    Err(errors.into_error())
	}
    }
}
