use crate::errors::Error;

use kube::api::DynamicObject;
use serde::Serialize;

/*
 * ObjectBuilder produces at most one dependent object from the owner it was
 * constructed with. Returning `Ok(None)` means the component is not wanted
 * for the current spec, which is different from failing to build it.
 *
 * Builders must be deterministic: the same owner yields the same object.
 */
pub trait ObjectBuilder: Send + Sync {

    fn component_name(&self) -> &str;

    fn is_namespaced(&self) -> bool;

    fn build(&self) -> Result<Option<DynamicObject>, Error>;
}

/*
 * Converts a typed k8s-openapi object into a DynamicObject.
 */
pub fn to_dynamic<T: Serialize>(obj: &T) -> Result<DynamicObject, Error> {
    let value = serde_json::to_value(obj)?;
    Ok(serde_json::from_value(value)?)
}
