//! Index documents and schema layout

use crate::models::{EntityId, ProjectId};
use crate::search::analyzer::ENTITY_TEXT_TOKENIZER;
use crate::search::config::{FieldKind, FieldSpec};
use crate::search::error::SearchResult;
use tantivy::schema::*;
use tantivy::TantivyDocument;

/// Discriminator term field shared by every document
pub const FIELD_TYPE: &str = "type";
/// Unique entity identifier of entity documents
pub const FIELD_ENTITY_ID: &str = "entity_id";
/// Owning project of entity documents
pub const FIELD_PROJECT_ID: &str = "project_id";
/// Schema version stored on the schema marker
pub const FIELD_INDEX_VERSION: &str = "index_version";
/// Highest scanned entity identifier stored on the progress marker
pub const FIELD_LAST_ENTITY_ID: &str = "last_entity_id";

/// Field names entity types cannot declare
pub const RESERVED_FIELDS: [&str; 5] = [
    FIELD_TYPE,
    FIELD_ENTITY_ID,
    FIELD_PROJECT_ID,
    FIELD_INDEX_VERSION,
    FIELD_LAST_ENTITY_ID,
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_FIELDS.contains(&name)
}

/// The three kinds of document an entity index holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr)]
pub enum DocKind {
    #[strum(serialize = "index_version")]
    SchemaMarker,
    #[strum(serialize = "last_entity_id")]
    ProgressMarker,
    #[strum(serialize = "entity")]
    Entity,
}

/// Resolved handles of the fields every entity index carries
#[derive(Debug, Clone, Copy)]
pub struct CoreFields {
    pub kind: Field,
    pub entity_id: Field,
    pub project_id: Field,
    pub index_version: Field,
    pub last_entity_id: Field,
}

impl CoreFields {
    pub fn resolve(schema: &Schema) -> SearchResult<Self> {
        Ok(Self {
            kind: schema.get_field(FIELD_TYPE)?,
            entity_id: schema.get_field(FIELD_ENTITY_ID)?,
            project_id: schema.get_field(FIELD_PROJECT_ID)?,
            index_version: schema.get_field(FIELD_INDEX_VERSION)?,
            last_entity_id: schema.get_field(FIELD_LAST_ENTITY_ID)?,
        })
    }

    pub fn kind_term(&self, kind: DocKind) -> Term {
        Term::from_field_text(self.kind, kind.as_ref())
    }

    pub fn entity_term(&self, entity_id: EntityId) -> Term {
        Term::from_field_u64(self.entity_id, entity_id)
    }

    pub fn project_term(&self, project_id: ProjectId) -> Term {
        Term::from_field_u64(self.project_id, project_id)
    }

    pub fn schema_marker(&self, version: u64) -> TantivyDocument {
        let mut doc = TantivyDocument::new();
        doc.add_text(self.kind, DocKind::SchemaMarker.as_ref());
        doc.add_u64(self.index_version, version);
        doc
    }

    pub fn progress_marker(&self, last_entity_id: EntityId) -> TantivyDocument {
        let mut doc = TantivyDocument::new();
        doc.add_text(self.kind, DocKind::ProgressMarker.as_ref());
        doc.add_u64(self.last_entity_id, last_entity_id);
        doc
    }
}

/// Build the schema of an entity index: core fields first, then `fields` in order
pub fn build_entity_schema(fields: &[FieldSpec]) -> Schema {
    let mut schema_builder = Schema::builder();

    schema_builder.add_text_field(FIELD_TYPE, STRING | STORED);
    schema_builder.add_u64_field(FIELD_ENTITY_ID, INDEXED | STORED | FAST);
    schema_builder.add_u64_field(FIELD_PROJECT_ID, INDEXED | STORED | FAST);
    schema_builder.add_u64_field(FIELD_INDEX_VERSION, STORED);
    schema_builder.add_u64_field(FIELD_LAST_ENTITY_ID, STORED);

    for spec in fields {
        match spec.kind {
            FieldKind::Text { stored } => {
                let indexing = TextFieldIndexing::default()
                    .set_tokenizer(ENTITY_TEXT_TOKENIZER)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions);
                let mut options = TextOptions::default().set_indexing_options(indexing);
                if stored {
                    options = options.set_stored();
                }
                schema_builder.add_text_field(&spec.name, options);
            }
            FieldKind::Keyword => {
                schema_builder.add_text_field(&spec.name, STRING | STORED);
            }
            FieldKind::U64 => {
                schema_builder.add_u64_field(&spec.name, INDEXED | STORED | FAST);
            }
            FieldKind::I64 => {
                schema_builder.add_i64_field(&spec.name, INDEXED | STORED | FAST);
            }
        }
    }

    schema_builder.build()
}

/// Collects the type-specific fields of one entity
///
/// Values for unknown, reserved or mistyped fields are ignored.
pub struct DocumentBuilder<'a> {
    schema: &'a Schema,
    doc: TantivyDocument,
}

impl<'a> DocumentBuilder<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            doc: TantivyDocument::new(),
        }
    }

    fn user_field(&self, name: &str) -> Option<(Field, &FieldType)> {
        if is_reserved(name) {
            return None;
        }
        let field = self.schema.get_field(name).ok()?;
        Some((field, self.schema.get_field_entry(field).field_type()))
    }

    /// Add a value to a text or keyword field; may be called repeatedly
    pub fn add_text(&mut self, name: &str, value: &str) -> &mut Self {
        if let Some((field, FieldType::Str(_))) = self.user_field(name) {
            self.doc.add_text(field, value);
        }
        self
    }

    pub fn add_u64(&mut self, name: &str, value: u64) -> &mut Self {
        if let Some((field, FieldType::U64(_))) = self.user_field(name) {
            self.doc.add_u64(field, value);
        }
        self
    }

    pub fn add_i64(&mut self, name: &str, value: i64) -> &mut Self {
        if let Some((field, FieldType::I64(_))) = self.user_field(name) {
            self.doc.add_i64(field, value);
        }
        self
    }

    pub fn into_document(self) -> TantivyDocument {
        self.doc
    }
}

/// A fully built entity document ready for upsert
#[derive(Debug, Clone)]
pub struct EntityDocument {
    pub entity_id: EntityId,
    pub project_id: ProjectId,
    pub document: TantivyDocument,
}

impl EntityDocument {
    /// Stamp type-specific fields with the core entity fields
    pub fn new(
        core: &CoreFields,
        entity_id: EntityId,
        project_id: ProjectId,
        fields: TantivyDocument,
    ) -> Self {
        let mut document = fields;
        document.add_text(core.kind, DocKind::Entity.as_ref());
        document.add_u64(core.entity_id, entity_id);
        document.add_u64(core.project_id, project_id);
        Self {
            entity_id,
            project_id,
            document,
        }
    }
}

/// First stored `u64` of `field`, if any
pub fn stored_u64(doc: &TantivyDocument, field: Field) -> Option<u64> {
    doc.get_first(field).and_then(|value| value.as_u64())
}
