//! Dynamic and chained properties.
//!
//! The registry stores one [`cell::PropertyCell`] per name holding JSON
//! values. [`DynamicProperty<T>`] is a typed view over a cell; the first
//! typed request claims the cell for `T`. A chained property is a cell with
//! an attached list of fallback names that it rescans whenever one of them
//! changes.

pub(crate) mod cell;
mod dynamic;

pub(crate) use cell::{ChainLink, PropertyCell, PropertyResolver};
pub use dynamic::{DynamicProperty, PropertyType};

/// `[primary, fallbacks...]` with empty names and duplicates removed.
pub(crate) fn fallback_chain<I, S>(primary: &str, fallbacks: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut names = vec![primary.to_string()];
    for name in fallbacks {
        let name = name.as_ref().trim();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}
