//! Canonical serialization and SHA-256 digests of composite records
//!
//! Fields are written in a fixed order as `name=<value>;`. Every value is
//! self-delimiting: an absent field is the tag `N`, a present one is
//! `S<byte length>:<text>`, and a code bag is `B<count>` followed by one
//! `|<byte length>:<code>` per code in sorted order. No code or region text
//! can therefore imitate a separator or the absent tag.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::aggregate::record::{CodeBag, CompositeRecord};

fn push_field(out: &mut String, name: &str, value: Option<&str>) {
    let _ = match value {
        Some(text) => write!(out, "{name}=S{}:{text};", text.len()),
        None => write!(out, "{name}=N;"),
    };
}

fn push_codes(out: &mut String, name: &str, codes: Option<&CodeBag>) {
    let Some(bag) = codes else {
        push_field(out, name, None);
        return;
    };
    let _ = write!(out, "{name}=B{}", bag.len());
    for code in bag.iter_sorted() {
        let _ = write!(out, "|{}:{code}", code.len());
    }
    out.push(';');
}

/// The canonical text a subject's digest is computed from
#[must_use]
pub fn canonical_form(record: &CompositeRecord) -> String {
    let mut out = String::with_capacity(128);
    let birth = record.birth_date.map(|d| d.format("%Y-%m-%d").to_string());
    let death = record.death_date.map(|d| d.format("%Y-%m-%d").to_string());

    push_field(&mut out, "subject", Some(&record.subject_id));
    push_field(&mut out, "sex", Some(record.sex.code()));
    push_field(&mut out, "birth", birth.as_deref());
    push_field(&mut out, "death", death.as_deref());
    push_field(&mut out, "region_min", record.region_min.as_deref());
    push_field(&mut out, "region_max", record.region_max.as_deref());
    push_codes(&mut out, "diagnoses", record.diagnoses.as_ref());
    push_codes(&mut out, "medications", record.medications.as_ref());
    out
}

/// Lowercase hex SHA-256 of the record's canonical form
#[must_use]
pub fn subject_digest(record: &CompositeRecord) -> String {
    let hash = Sha256::digest(canonical_form(record).as_bytes());
    format!("{hash:x}")
}

/// Digest every record, in parallel
#[must_use]
pub fn digest_all(records: &BTreeMap<String, CompositeRecord>) -> BTreeMap<String, String> {
    records
        .par_iter()
        .map(|(subject, record)| (subject.clone(), subject_digest(record)))
        .collect::<Vec<_>>()
        .into_iter()
        .collect()
}

/// One row of the persisted subject → digest table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectHashEntry {
    /// Subject identifier
    pub subject_id: String,
    /// Lowercase hex SHA-256 digest
    pub digest: String,
}

/// Flatten a digest map into table rows, sorted by subject
#[must_use]
pub fn hash_table(digests: &BTreeMap<String, String>) -> Vec<SubjectHashEntry> {
    digests
        .iter()
        .map(|(subject_id, digest)| SubjectHashEntry {
            subject_id: subject_id.clone(),
            digest: digest.clone(),
        })
        .collect()
}
