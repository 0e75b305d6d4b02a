//! Function Registry (spec §4.C): the process-wide table that maps a
//! function's stable wire name to its implementation and calling
//! convention. Registration happens once, during startup; after that the
//! table is frozen and concurrent `lookup`s need no locking (spec §5:
//! "Shared resources").

use async_trait::async_trait;
use durable_proto::{ErrorEnvelope, TypedEnvelope};
use durable_workflow::EntryFn;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// The calling convention a registered function uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    /// Runs to completion without suspending; never yields a Poll directive.
    OneShot,
    /// A durable coroutine: may suspend across RunRequests (spec §4.D).
    Coroutine,
}

/// `(name, kind, entry)`, immutable after registration (spec §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionDescriptor {
    pub name: String,
    pub kind: FunctionKind,
    pub version: String,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, kind: FunctionKind, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            version: version.into(),
        }
    }
}

/// A one-shot function implementation: runs to completion on a single
/// invocation, with no access to the durable `Context`.
#[async_trait]
pub trait OneShotFn: Send + Sync + 'static {
    async fn call(&self, input: TypedEnvelope) -> Result<TypedEnvelope, ErrorEnvelope>;
}

#[async_trait]
impl<F, Fut> OneShotFn for F
where
    F: Fn(TypedEnvelope) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<TypedEnvelope, ErrorEnvelope>> + Send + 'static,
{
    async fn call(&self, input: TypedEnvelope) -> Result<TypedEnvelope, ErrorEnvelope> {
        (self)(input).await
    }
}

/// A function's actual callable body, type-erased behind its kind.
#[derive(Clone)]
pub enum Implementation {
    OneShot(Arc<dyn OneShotFn>),
    Coroutine(Arc<EntryFn>),
}

/// A lightweight reference to a registered function, handed to
/// non-durable code that wants to originate calls against it (spec §4.H's
/// Local Client is the typical caller of `dispatch_client_for`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionHandle {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("function {0:?} is already registered under a different descriptor")]
    Conflict(String),
    #[error("function {0:?} is not registered")]
    NotFound(String),
}

struct Entry {
    descriptor: FunctionDescriptor,
    implementation: Implementation,
}

/// A registry under construction. Collects registrations and then
/// [`freeze`](RegistryBuilder::freeze)s into an immutable [`Registry`] —
/// the boundary spec §5 draws between "registration happening only during
/// startup" and safe unlocked concurrent reads afterward.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<String, Entry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function. Idempotent for an identical descriptor under
    /// the same name; returns [`RegistryError::Conflict`] if the name is
    /// already bound to a different descriptor (spec §3 invariant 4).
    pub fn register(
        mut self,
        descriptor: FunctionDescriptor,
        implementation: Implementation,
    ) -> Result<Self, RegistryError> {
        match self.entries.get(&descriptor.name) {
            Some(existing) if existing.descriptor == descriptor => {}
            Some(_) => return Err(RegistryError::Conflict(descriptor.name)),
            None => {
                self.entries.insert(
                    descriptor.name.clone(),
                    Entry {
                        descriptor,
                        implementation,
                    },
                );
            }
        }
        Ok(self)
    }

    pub fn freeze(self) -> Registry {
        Registry {
            entries: self.entries,
        }
    }
}

/// An immutable, process-wide function table. Plain data behind an `Arc` —
/// no interior mutability, so readers never contend with each other or with
/// a registration phase that has already finished.
pub struct Registry {
    entries: HashMap<String, Entry>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn lookup(&self, name: &str) -> Result<&FunctionDescriptor, RegistryError> {
        self.entries
            .get(name)
            .map(|entry| &entry.descriptor)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn implementation(&self, name: &str) -> Result<&Implementation, RegistryError> {
        self.entries
            .get(name)
            .map(|entry| &entry.implementation)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// `lookup` and `implementation` in one call, for callers that need both.
    pub fn get(&self, name: &str) -> Result<(&FunctionDescriptor, &Implementation), RegistryError> {
        self.entries
            .get(name)
            .map(|entry| (&entry.descriptor, &entry.implementation))
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Returns a handle non-durable code can use to originate calls against
    /// `name` (spec §4.C).
    pub fn dispatch_client_for(&self, name: &str) -> Result<FunctionHandle, RegistryError> {
        let descriptor = self.lookup(name)?;
        Ok(FunctionHandle {
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn one_shot() -> Implementation {
        Implementation::OneShot(Arc::new(|input: TypedEnvelope| async move { Ok(input) }))
    }

    #[test]
    fn lookup_fails_for_unregistered_name() {
        let registry = Registry::builder().freeze();
        assert_eq!(
            registry.lookup("missing").unwrap_err(),
            RegistryError::NotFound("missing".to_string())
        );
    }

    #[test]
    fn register_then_lookup_round_trips() {
        let descriptor = FunctionDescriptor::new("pkg.add_one", FunctionKind::OneShot, "v1");
        let registry = Registry::builder()
            .register(descriptor.clone(), one_shot())
            .unwrap()
            .freeze();
        assert_eq!(registry.lookup("pkg.add_one").unwrap(), &descriptor);
    }

    #[test]
    fn repeated_identical_registration_is_idempotent() {
        let descriptor = FunctionDescriptor::new("pkg.add_one", FunctionKind::OneShot, "v1");
        let builder = Registry::builder()
            .register(descriptor.clone(), one_shot())
            .unwrap();
        assert!(builder.register(descriptor, one_shot()).is_ok());
    }

    #[test]
    fn conflicting_registration_under_the_same_name_is_rejected() {
        let v1 = FunctionDescriptor::new("pkg.add_one", FunctionKind::OneShot, "v1");
        let v2 = FunctionDescriptor::new("pkg.add_one", FunctionKind::OneShot, "v2");
        let builder = Registry::builder().register(v1, one_shot()).unwrap();
        assert_eq!(
            builder.register(v2, one_shot()).unwrap_err(),
            RegistryError::Conflict("pkg.add_one".to_string())
        );
    }

    #[test]
    fn dispatch_client_for_returns_a_handle() {
        let descriptor = FunctionDescriptor::new("pkg.add_one", FunctionKind::Coroutine, "v3");
        let registry = Registry::builder()
            .register(
                descriptor,
                Implementation::Coroutine(Arc::new(|_ctx, input| {
                    Box::pin(async move { durable_workflow::Outcome::Value(input) })
                })),
            )
            .unwrap()
            .freeze();
        let handle = registry.dispatch_client_for("pkg.add_one").unwrap();
        assert_eq!(handle.name, "pkg.add_one");
        assert_eq!(handle.version, "v3");
    }
}
