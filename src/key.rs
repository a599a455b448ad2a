//! Key Derivation
//!
//! Builds cache keys for memoized calls: a namespace naming the function
//! plus a hash of its serde-encoded arguments.

use serde::Serialize;
use xxhash_rust::xxh3::xxh3_128;

use crate::error::{CacheError, Result};

/// Namespace for a function or closure, taken from its type path.
///
/// Function items yield paths such as `my_app::users::load_user`. Closures
/// all read `<enclosing fn>::{{closure}}`, so two closures in one function
/// collide; pass named functions.
pub fn function_key<F>(_func: &F) -> &'static str {
    std::any::type_name::<F>()
}

/// Derives `{namespace}:{hash}` from the arguments of a call.
///
/// Arguments are JSON-encoded before hashing, so any `Serialize` type works
/// as an argument, including tuples for several arguments. Map arguments
/// must have a stable iteration order (use `BTreeMap`, not `HashMap`) for
/// equal arguments to produce equal keys.
///
/// # Arguments
/// * `namespace` - Usually [`function_key`] of the computing function
/// * `args` - The call's arguments
pub fn value_key<A: Serialize + ?Sized>(namespace: &str, args: &A) -> Result<String> {
    let encoded = serde_json::to_vec(args)
        .map_err(|e| CacheError::UnencodableValue(format!("arguments for {namespace}: {e}")))?;
    Ok(format!("{namespace}:{:032x}", xxh3_128(&encoded)))
}
