//! Function table for the serving side of RPC.
//!
//! Functions are registered by name with typed arguments and return values.
//! A [`TypedFunction`] unpacks the Spb argument list, invokes the closure and
//! packs what it returns, so the engine only deals in bytes.

use std::collections::HashMap;
use std::marker::PhantomData;

use crate::codec::{SpbArgs, SpbError};
use crate::service::CurrentContext;

/// A callable RPC function working on packed argument lists.
pub trait RpcFunction: Send + Sync + 'static {
    /// Decode `args`, run, and return the packed results.
    fn call(&self, ctx: &CurrentContext, args: &[u8]) -> Result<Vec<u8>, SpbError>;
}

/// Adapter from a typed closure to [`RpcFunction`].
pub struct TypedFunction<F, A, R> {
    func: F,
    _phantom: PhantomData<fn(A) -> R>,
}

impl<F, A, R> TypedFunction<F, A, R>
where
    F: Fn(&CurrentContext, A) -> R + Send + Sync + 'static,
    A: SpbArgs + 'static,
    R: SpbArgs + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, A, R> RpcFunction for TypedFunction<F, A, R>
where
    F: Fn(&CurrentContext, A) -> R + Send + Sync + 'static,
    A: SpbArgs + 'static,
    R: SpbArgs + 'static,
{
    fn call(&self, ctx: &CurrentContext, args: &[u8]) -> Result<Vec<u8>, SpbError> {
        let args = A::from_spb_args(args)?;
        Ok((self.func)(ctx, args).to_spb_args())
    }
}

/// Functions by name.
#[derive(Default)]
pub struct RpcRegistry {
    functions: HashMap<String, Box<dyn RpcFunction>>,
}

impl RpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `func` under `name`, replacing an earlier registration.
    pub fn register<F, A, R>(&mut self, name: &str, func: F)
    where
        F: Fn(&CurrentContext, A) -> R + Send + Sync + 'static,
        A: SpbArgs + 'static,
        R: SpbArgs + 'static,
    {
        if self
            .functions
            .insert(name.to_string(), Box::new(TypedFunction::new(func)))
            .is_some()
        {
            tracing::warn!(function = name, "rpc function registered twice");
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn RpcFunction> {
        self.functions.get(name).map(|f| f.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Registered names, unordered.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for RpcRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.functions.keys()).finish()
    }
}
