//! Structural checksum of document content.
//!
//! The checksum is a CRC-32 over a canonical walk of the environment:
//! identities, the element hierarchy, value types, and static values.
//! A Property's value only contributes when its category is `CONSTANT`
//! or `PARAMETER`; live measurement values change constantly and must not
//! make a document look modified. Structure markers are hashed around
//! every container, so moving an element to another parent changes the
//! checksum even when the flat list of fields stays the same.

use crc32fast::Hasher;

use crate::content::{Environment, Reference, SubmodelElement};

/// Computes the change-detection checksum of an environment.
pub fn compute_checksum(env: &Environment) -> u32 {
    let mut hasher = Hasher::new();

    for shell in &env.asset_administration_shells {
        field(&mut hasher, "aas");
        field(&mut hasher, &shell.id);
        field(&mut hasher, &shell.id_short);
        optional(&mut hasher, shell.asset_information.asset_kind.as_deref());
        optional(&mut hasher, shell.asset_information.global_asset_id.as_deref());
        optional(
            &mut hasher,
            shell
                .asset_information
                .default_thumbnail
                .as_ref()
                .map(|t| t.path.as_str()),
        );
        for reference in &shell.submodels {
            reference_fields(&mut hasher, reference);
        }
        field(&mut hasher, ")");
    }

    for submodel in &env.submodels {
        field(&mut hasher, "sm");
        field(&mut hasher, &submodel.id);
        field(&mut hasher, &submodel.id_short);
        if let Some(semantic_id) = &submodel.semantic_id {
            reference_fields(&mut hasher, semantic_id);
        }
        for element in &submodel.submodel_elements {
            element_fields(&mut hasher, element);
        }
        field(&mut hasher, ")");
    }

    hasher.finalize()
}

fn element_fields(hasher: &mut Hasher, element: &SubmodelElement) {
    field(hasher, element.abbreviation());
    field(hasher, element.id_short());

    match element {
        SubmodelElement::Property {
            category,
            value_type,
            value,
            ..
        } => {
            optional(hasher, category.as_deref());
            field(hasher, value_type);
            if is_static_category(category.as_deref()) {
                optional(hasher, value.as_deref());
            }
        }
        SubmodelElement::MultiLanguageProperty { value, .. } => {
            for text in value {
                field(hasher, &text.language);
                field(hasher, &text.text);
            }
        }
        SubmodelElement::Range {
            value_type,
            min,
            max,
            ..
        } => {
            field(hasher, value_type);
            optional(hasher, min.as_deref());
            optional(hasher, max.as_deref());
        }
        SubmodelElement::File {
            content_type,
            value,
            ..
        } => {
            field(hasher, content_type);
            optional(hasher, value.as_deref());
        }
        SubmodelElement::Blob { content_type, .. } => field(hasher, content_type),
        SubmodelElement::ReferenceElement { value, .. } => {
            if let Some(reference) = value {
                reference_fields(hasher, reference);
            }
        }
        SubmodelElement::Entity {
            global_asset_id, ..
        } => optional(hasher, global_asset_id.as_deref()),
        SubmodelElement::SubmodelElementCollection { .. }
        | SubmodelElement::SubmodelElementList { .. }
        | SubmodelElement::Other => {}
    }

    let children = element.children();
    if !children.is_empty() {
        field(hasher, "(");
        for child in children {
            element_fields(hasher, child);
        }
        field(hasher, ")");
    }
}

fn is_static_category(category: Option<&str>) -> bool {
    matches!(
        category,
        Some(c) if c.eq_ignore_ascii_case("CONSTANT") || c.eq_ignore_ascii_case("PARAMETER")
    )
}

fn reference_fields(hasher: &mut Hasher, reference: &Reference) {
    field(hasher, &reference.kind);
    for key in &reference.keys {
        field(hasher, &key.kind);
        field(hasher, &key.value);
    }
}

fn field(hasher: &mut Hasher, value: &str) {
    hasher.update(value.as_bytes());
    hasher.update(&[0]);
}

fn optional(hasher: &mut Hasher, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update(&[1]);
            field(hasher, v);
        }
        None => hasher.update(&[2]),
    }
}
