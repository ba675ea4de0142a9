//! External function registration
//!
//! The host describes each callable function to the guest with a descriptor
//! written into the arena. The guest answers with a [`FunctionId`], and the
//! host records the callback under that id in the session's
//! [`FunctionTable`].

use super::{BridgeError, CallCtx, Session};
use crate::abi::{descriptor_slots, encode_descriptor, ArgType, Signature, TypeTag, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use wasmtime::{Store, TypedFunc};

/// Largest id the table accepts from the guest.
pub const MAX_FUNCTION_ID: u32 = 65_535;

/// A positive id assigned by the guest at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(u32);

impl FunctionId {
    /// `None` for zero and negative values, which the guest uses to reject
    /// a registration.
    pub fn from_raw(raw: i32) -> Option<Self> {
        if raw > 0 {
            Some(Self(raw as u32))
        } else {
            None
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn as_i32(self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Host code run when the guest calls an external function. Arguments are
/// already decoded and checked against the registered signature.
pub type Callback =
    Arc<dyn Fn(&mut CallCtx<'_, '_>, &[Value]) -> Result<(), BridgeError> + Send + Sync>;

/// A function the host offers to the guest, before registration.
#[derive(Clone)]
pub struct ExternalFunction {
    name: String,
    signature: Signature,
    callback: Callback,
}

impl ExternalFunction {
    /// Function taking `args` and returning nothing.
    pub fn new<F>(name: impl Into<String>, args: impl Into<Vec<TypeTag>>, callback: F) -> Self
    where
        F: Fn(&mut CallCtx<'_, '_>, &[Value]) -> Result<(), BridgeError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            signature: Signature::new(args, Vec::new()),
            callback: Arc::new(callback),
        }
    }

    /// Declare return tags. The guest is told about them at registration,
    /// but calls that expect results are answered with the unsupported
    /// status.
    pub fn with_returns(mut self, rets: impl Into<Vec<TypeTag>>) -> Self {
        self.signature.rets = rets.into();
        self
    }

    pub fn procedure0<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut CallCtx<'_, '_>) -> Result<(), BridgeError> + Send + Sync + 'static,
    {
        Self::new(name, Vec::new(), move |ctx, _| f(ctx))
    }

    pub fn procedure1<A, F>(name: impl Into<String>, f: F) -> Self
    where
        A: ArgType,
        F: Fn(&mut CallCtx<'_, '_>, A) -> Result<(), BridgeError> + Send + Sync + 'static,
    {
        Self::new(name, vec![A::TAG], move |ctx, args| match args {
            [a] => {
                let a = A::try_from(a.clone()).map_err(|e| ctx.fail(e))?;
                f(ctx, a)
            }
            _ => Err(ctx.fail(format!("expected 1 argument, got {}", args.len()))),
        })
    }

    pub fn procedure2<A, B, F>(name: impl Into<String>, f: F) -> Self
    where
        A: ArgType,
        B: ArgType,
        F: Fn(&mut CallCtx<'_, '_>, A, B) -> Result<(), BridgeError> + Send + Sync + 'static,
    {
        Self::new(name, vec![A::TAG, B::TAG], move |ctx, args| match args {
            [a, b] => {
                let a = A::try_from(a.clone()).map_err(|e| ctx.fail(e))?;
                let b = B::try_from(b.clone()).map_err(|e| ctx.fail(e))?;
                f(ctx, a, b)
            }
            _ => Err(ctx.fail(format!("expected 2 arguments, got {}", args.len()))),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl fmt::Debug for ExternalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalFunction")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// A registered function: one row of the table.
pub struct FunctionEntry {
    pub name: String,
    pub signature: Signature,
    pub callback: Callback,
}

impl fmt::Debug for FunctionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionEntry")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Dense table of registered functions, indexed by id.
///
/// Rows are never removed or replaced for the life of the session.
#[derive(Debug, Default)]
pub struct FunctionTable {
    entries: Vec<Option<Arc<FunctionEntry>>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: FunctionId, entry: FunctionEntry) -> Result<(), BridgeError> {
        if id.get() > MAX_FUNCTION_ID {
            return Err(BridgeError::IdOutOfRange(id.as_i32()));
        }
        let index = id.get() as usize;
        if index >= self.entries.len() {
            self.entries.resize_with(index + 1, || None);
        }
        match &mut self.entries[index] {
            Some(_) => Err(BridgeError::DuplicateId(id.get())),
            slot => {
                *slot = Some(Arc::new(entry));
                Ok(())
            }
        }
    }

    /// Look up a raw id as passed by the guest.
    pub fn get(&self, raw: i32) -> Option<Arc<FunctionEntry>> {
        let id = FunctionId::from_raw(raw)?;
        self.entries.get(id.get() as usize)?.clone()
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (FunctionId, &FunctionEntry)> {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            let entry = entry.as_deref()?;
            Some((FunctionId(index as u32), entry))
        })
    }

    /// Every id registered under `name`, one per overload.
    pub fn find<'a>(&'a self, name: &'a str) -> impl Iterator<Item = FunctionId> + 'a {
        self.iter()
            .filter(move |(_, entry)| entry.name == name)
            .map(|(id, _)| id)
    }
}

/// A set of external functions installed together.
pub trait FunctionProvider {
    fn external_functions(&self) -> Vec<ExternalFunction>;
}

/// Describe `func` to the guest and record it under the id it assigns.
pub(crate) fn register_function(
    store: &mut Store<Session>,
    register: &TypedFunc<i32, i32>,
    func: ExternalFunction,
) -> Result<FunctionId, BridgeError> {
    let allocator = store.data().allocator()?;
    let signature = func.signature;

    let name_ptr = allocator.write_string(&mut *store, &func.name)?;
    let descriptor = encode_descriptor(name_ptr, &signature.args, &signature.rets);
    let descriptor_ptr =
        allocator.allocate(&mut *store, descriptor_slots(&signature.args, &signature.rets))?;
    allocator
        .arena()
        .write(&mut *store, descriptor_ptr, &descriptor)?;

    let raw = register
        .call(&mut *store, descriptor_ptr.as_i32())
        .map_err(BridgeError::from_guest)?;
    let id = FunctionId::from_raw(raw).ok_or_else(|| BridgeError::RegistrationRejected {
        name: func.name.clone(),
        code: raw,
    })?;

    debug!(name = %func.name, %id, %signature, "registered external function");
    store.data_mut().table.insert(
        id,
        FunctionEntry {
            name: func.name,
            signature,
            callback: func.callback,
        },
    )?;
    Ok(id)
}
