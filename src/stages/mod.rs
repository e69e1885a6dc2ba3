//! Stages that need the application's I/O stack, and the registry the
//! binary assembles pipelines from.

mod dictionary;
mod dictionary_lookup;
mod extract_entities;
mod fetch_uri;

pub use dictionary::{load_dictionaries, load_dictionary, DictionaryEntry};
pub use dictionary_lookup::DictionaryLookup;
pub use extract_entities::ExtractEntities;
pub use fetch_uri::FetchUri;

use sluice_core::registry::StageRegistry;

/// Built-in core stages plus the application stages.
pub fn stage_registry() -> StageRegistry {
    let mut registry = StageRegistry::with_builtins();
    registry.register(
        "fetch_uri",
        "Download the URL in a field and store the response body",
        |c| Ok(Box::new(FetchUri::new(c)?)),
    );
    registry.register(
        "dictionary_lookup",
        "Map whole field values through a dictionary file",
        |c| Ok(Box::new(DictionaryLookup::new(c)?)),
    );
    registry.register(
        "extract_entities",
        "Extract dictionary terms found in text fields",
        |c| Ok(Box::new(ExtractEntities::new(c)?)),
    );
    registry
}

/// Print every registered stage type.
pub fn list_stages(registry: &StageRegistry) {
    println!("{:<24} DESCRIPTION", "STAGE");
    for stage_type in registry.types() {
        println!("{:<24} {}", stage_type.name, stage_type.description);
    }
}
