pub mod lazy;

pub use lazy::{EntityResolver, LazyRef, ProxyState, ReferenceKey};
