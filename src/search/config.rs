//! Per-entity-type index configuration

use crate::models::ProjectEntity;
use crate::search::document::{build_entity_schema, is_reserved, DocumentBuilder};
use crate::search::error::{SearchError, SearchResult};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tantivy::schema::Schema;

/// How a type-specific field is indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Analyzed full text; optionally stored
    Text { stored: bool },
    /// Single untokenized term
    Keyword,
    U64,
    I64,
}

/// Name and kind of a type-specific field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Fills the type-specific fields of one entity
pub type Extractor<E> = Arc<dyn Fn(&E, &mut DocumentBuilder<'_>) + Send + Sync>;

/// Everything needed to index one entity type
pub struct EntityIndexConfig<E> {
    type_name: String,
    index_name: String,
    version: u64,
    fields: Vec<FieldSpec>,
    default_query_fields: Vec<String>,
    extractor: Extractor<E>,
}

impl<E> Clone for EntityIndexConfig<E> {
    fn clone(&self) -> Self {
        Self {
            type_name: self.type_name.clone(),
            index_name: self.index_name.clone(),
            version: self.version,
            fields: self.fields.clone(),
            default_query_fields: self.default_query_fields.clone(),
            extractor: Arc::clone(&self.extractor),
        }
    }
}

impl<E> fmt::Debug for EntityIndexConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityIndexConfig")
            .field("type_name", &self.type_name)
            .field("index_name", &self.index_name)
            .field("version", &self.version)
            .field("fields", &self.fields)
            .field("default_query_fields", &self.default_query_fields)
            .finish_non_exhaustive()
    }
}

impl<E: ProjectEntity> EntityIndexConfig<E> {
    /// Start configuring the index of `type_name` at schema `version`
    pub fn builder(type_name: impl Into<String>, version: u64) -> EntityIndexConfigBuilder<E> {
        EntityIndexConfigBuilder::new(type_name.into(), version)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Directory name of the index, e.g. `pull_request`
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Expected schema version; a mismatch on disk triggers a rebuild
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn default_query_fields(&self) -> &[String] {
        &self.default_query_fields
    }

    pub fn schema(&self) -> Schema {
        build_entity_schema(&self.fields)
    }

    /// `<index_root>/<index_name>`
    pub fn index_dir(&self, index_root: &Path) -> PathBuf {
        index_root.join(&self.index_name)
    }

    pub fn extract(&self, entity: &E, builder: &mut DocumentBuilder<'_>) {
        (self.extractor)(entity, builder)
    }
}

/// Builder for [`EntityIndexConfig`]
pub struct EntityIndexConfigBuilder<E> {
    type_name: String,
    index_name: Option<String>,
    version: u64,
    fields: Vec<FieldSpec>,
    default_query_fields: Vec<String>,
    extractor: Option<Extractor<E>>,
}

impl<E: ProjectEntity> EntityIndexConfigBuilder<E> {
    fn new(type_name: String, version: u64) -> Self {
        Self {
            type_name,
            index_name: None,
            version,
            fields: Vec::new(),
            default_query_fields: Vec::new(),
            extractor: None,
        }
    }

    /// Override the name derived from the type name
    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Analyzed, unstored text field
    pub fn text_field(self, name: impl Into<String>) -> Self {
        self.field(FieldSpec::new(name, FieldKind::Text { stored: false }))
    }

    pub fn stored_text_field(self, name: impl Into<String>) -> Self {
        self.field(FieldSpec::new(name, FieldKind::Text { stored: true }))
    }

    pub fn keyword_field(self, name: impl Into<String>) -> Self {
        self.field(FieldSpec::new(name, FieldKind::Keyword))
    }

    pub fn u64_field(self, name: impl Into<String>) -> Self {
        self.field(FieldSpec::new(name, FieldKind::U64))
    }

    pub fn i64_field(self, name: impl Into<String>) -> Self {
        self.field(FieldSpec::new(name, FieldKind::I64))
    }

    /// Fields searched by unqualified query terms
    pub fn default_query_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_query_fields = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&E, &mut DocumentBuilder<'_>) + Send + Sync + 'static,
    {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    pub fn build(self) -> SearchResult<EntityIndexConfig<E>> {
        if self.type_name.trim().is_empty() {
            return Err(SearchError::InvalidConfiguration(
                "entity type name must not be empty".to_string(),
            ));
        }

        let index_name = self
            .index_name
            .unwrap_or_else(|| index_name_for(&self.type_name));
        if index_name.is_empty()
            || !index_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(SearchError::InvalidConfiguration(format!(
                "invalid index name '{}'",
                index_name
            )));
        }

        {
            let mut seen = HashSet::new();
            for spec in &self.fields {
                if !is_valid_field_name(&spec.name) {
                    return Err(SearchError::InvalidConfiguration(format!(
                        "invalid field name '{}'",
                        spec.name
                    )));
                }
                if is_reserved(&spec.name) {
                    return Err(SearchError::InvalidConfiguration(format!(
                        "field name '{}' is reserved",
                        spec.name
                    )));
                }
                if !seen.insert(spec.name.as_str()) {
                    return Err(SearchError::InvalidConfiguration(format!(
                        "field '{}' declared twice",
                        spec.name
                    )));
                }
            }
        }

        for name in &self.default_query_fields {
            match self.fields.iter().find(|spec| &spec.name == name) {
                Some(FieldSpec {
                    kind: FieldKind::Text { .. } | FieldKind::Keyword,
                    ..
                }) => {}
                Some(_) => {
                    return Err(SearchError::InvalidConfiguration(format!(
                        "default query field '{}' must be a text or keyword field",
                        name
                    )))
                }
                None => {
                    return Err(SearchError::InvalidConfiguration(format!(
                        "default query field '{}' is not declared",
                        name
                    )))
                }
            }
        }

        let extractor = self.extractor.ok_or_else(|| {
            SearchError::InvalidConfiguration(format!(
                "no field extractor configured for {}",
                self.type_name
            ))
        })?;

        Ok(EntityIndexConfig {
            type_name: self.type_name,
            index_name,
            version: self.version,
            fields: self.fields,
            default_query_fields: self.default_query_fields,
            extractor,
        })
    }
}

fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Derive an index name from a type name: `PullRequest` becomes `pull_request`
pub fn index_name_for(type_name: &str) -> String {
    let type_name = type_name.rsplit("::").next().unwrap_or(type_name);
    let chars: Vec<char> = type_name.chars().collect();
    let mut name = String::with_capacity(type_name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).map_or(false, |n| n.is_lowercase());
            let word_start = prev.is_uppercase() && next_is_lower;
            if prev.is_lowercase() || prev.is_ascii_digit() || word_start {
                name.push('_');
            }
        }
        name.extend(c.to_lowercase());
    }
    name
}
