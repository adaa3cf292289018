//! Machine-instance natives: introspection, cross-instance calls, variable
//! references and cooperative suspend requests.
//!
//! The natives work against any [`Instance`] registered in a [`Registry`].
//! Scripts reach them through [`Natives::invoke`], which looks the native
//! up in the [`table`], runs it and applies the outcome to the caller.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//!
//! use amxkit_common::{Cell, ErrorCode};
//! use amxkit_natives::{ForeignCall, Host, Machine, MachineLayout, Natives, Registry};
//! use parking_lot::Mutex;
//!
//! struct NoHost;
//!
//! impl Host for NoHost {
//!     fn invoke(&self, _: &ForeignCall<'_>) -> Result<Cell, ErrorCode> {
//!         Err(ErrorCode::NOTFOUND)
//!     }
//!     fn create_string(&self, _: &str) -> Cell {
//!         0
//!     }
//! }
//!
//! let registry = Arc::new(Registry::new());
//! let natives = Natives::new(Arc::clone(&registry), Arc::new(NoHost));
//! let machine = Arc::new(Mutex::new(Machine::new("script", MachineLayout::default())));
//! let amx = registry.register(machine);
//!
//! let var = natives.invoke(amx, "amx_var", &[16]).unwrap();
//! natives.invoke(amx, "amx_set", &[var, 42]).unwrap();
//! assert_eq!(natives.invoke(amx, "amx_get", &[var]), Ok(42));
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod instance;
pub mod machine;
pub mod natives;
pub mod pool;
pub mod registry;
pub mod source;
pub mod suspend;
pub mod table;
pub mod var;

pub use config::HostConfig;
pub use dispatch::{CallArgs, CallKind, Dispatcher, ForeignCall, Host, Target, TryOutcome};
pub use error::NativeError;
pub use handle::{HandlePool, TaggedValue};
pub use instance::{Entry, Instance, NativeAddr, Region};
pub use machine::{Machine, MachineLayout};
pub use natives::Natives;
pub use registry::{InstanceContext, Registry};
pub use suspend::{ForkInfo, ForkRequest, Outcome};
pub use var::{VarPool, VarRef};
