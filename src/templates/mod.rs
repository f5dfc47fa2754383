//! Question templates: the static catalog, confidence-gated selection, and
//! placeholder resolution.

pub mod catalog;
pub mod placeholder;
pub mod resolver;
pub mod selector;

pub use catalog::TemplateCatalog;
pub use placeholder::contains_placeholder_token;
pub use resolver::PlaceholderResolver;
pub use selector::TemplateSelector;
