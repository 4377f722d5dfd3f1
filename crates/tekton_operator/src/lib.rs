pub mod api;
pub mod client;
pub mod conditions;
pub mod controllers;
pub mod defaults;
pub mod installerset;
pub mod manifests;
pub mod platform;
pub mod pruner_store;
pub mod settings;
pub mod transform;
pub mod upgrade;
pub mod util;
pub mod validation;

#[cfg(test)]
pub mod testing;

#[cfg(test)]
pub mod tests;
