//! Per-request context handed to middleware and handlers.
//!
//! A [`Context`] owns the parsed [`Request`] plus a clone of the router's
//! [`Extensions`], which is how shared application services (the chat
//! backend, the bundled page) reach handlers without globals.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use crate::Request;

/// Type-keyed map of shared, reference-counted values.
///
/// Cloning is cheap: only the `Arc`s are cloned, so the router hands every
/// request its own copy.
#[derive(Default, Clone)]
pub struct Extensions {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, replacing any previous value of the same type.
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Returns a handle to the stored value of type `T`.
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Per-request state: the request itself and the shared extensions.
pub struct Context {
    request: Request,
    extensions: Extensions,
}

impl Context {
    pub fn new(request: Request, extensions: Extensions) -> Self {
        Self {
            request,
            extensions,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Shorthand for `self.extensions().get::<T>()`.
    pub fn extension<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.extensions.get::<T>()
    }

    /// Decodes the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde::Deserialize;

    #[derive(Debug, PartialEq)]
    struct Greeting(&'static str);

    #[test]
    fn extensions_are_keyed_by_type() {
        let mut ext = Extensions::new();
        ext.insert(Greeting("hi"));
        ext.insert(42u32);
        assert_eq!(ext.len(), 2);
        assert_eq!(*ext.get::<Greeting>().unwrap(), Greeting("hi"));
        assert_eq!(*ext.get::<u32>().unwrap(), 42);
        assert!(ext.get::<String>().is_none());
    }

    #[test]
    fn cloned_extensions_share_values() {
        let mut ext = Extensions::new();
        ext.insert(Greeting("shared"));
        let copy = ext.clone();
        assert!(Arc::ptr_eq(
            &ext.get::<Greeting>().unwrap(),
            &copy.get::<Greeting>().unwrap()
        ));
    }

    #[test]
    fn json_reads_request_body() {
        #[derive(Deserialize)]
        struct Payload {
            name: String,
        }

        let raw = b"POST / HTTP/1.1\r\nContent-Length: 16\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        let req = req.with_body(Bytes::from_static(br#"{"name":"relay"}"#));
        let ctx = Context::new(req, Extensions::new());
        let payload: Payload = ctx.json().unwrap();
        assert_eq!(payload.name, "relay");
    }
}
