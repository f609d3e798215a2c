//! Canonical field names per table and the spreadsheet spellings they accept.
//!
//! Historical workbooks spell headers in every casing imaginable. Each declared
//! table lists its canonical names together with the aliases that map onto
//! them; the lookup index is built and checked once, at startup.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::schema::{self, APPOINTMENT, CUSTOMER, DOG};

/// A row keyed by field name. Keys are canonical once [`canonicalize_row`] ran.
pub type NormalizedRow = Map<String, Value>;

pub const CUSTOMER_REFERENCE: &str = "CustomerId";

/// Spellings of the customer reference seen in older exports.
pub const CUSTOMER_REFERENCE_ALIASES: &[&str] =
    &["CustomerId", "customer_id", "customerId", "CUSTOMERID", "customerid"];

#[derive(Debug, Clone, Copy)]
struct FieldAliases {
    canonical: &'static str,
    aliases: &'static [&'static str],
}

const fn alias(canonical: &'static str, aliases: &'static [&'static str]) -> FieldAliases {
    FieldAliases { canonical, aliases }
}

const CUSTOMER_ALIASES: &[FieldAliases] = &[
    alias("Id", &["id"]),
    alias("Naam", &["naam", "name"]),
    alias("Contactpersoon", &["contactpersoon", "contact_persoon"]),
    alias("Emailadres", &["emailadres", "email", "email_adres"]),
    alias("Telefoon", &["telefoon", "phone", "telefoonnummer"]),
    alias("Adres", &["adres", "address"]),
    alias("Postcode", &["postcode", "zipcode"]),
    alias("Woonplaats", &["woonplaats", "city", "plaats"]),
    alias("Notities", &["notities", "notes"]),
    alias("IsAllowContactShare", &["isallowcontactshare", "is_allow_contact_share"]),
    alias("CreatedOn", &["createdon", "created_on"]),
    alias("UpdatedOn", &["updatedon", "updated_on"]),
];

const DOG_ALIASES: &[FieldAliases] = &[
    alias("Id", &["id"]),
    alias(CUSTOMER_REFERENCE, &["customerid", "customer_id"]),
    alias("Name", &["name", "naam", "dogname"]),
    alias("DogBreedId", &["dogbreedid", "dog_breed_id", "breedid"]),
    alias("DogSizeId", &["dogsizeid", "dog_size_id", "sizeid"]),
    alias("Birthday", &["birthday", "birthdate", "geboortedatum"]),
    alias("Allergies", &["allergies", "allergieen"]),
    alias("ServiceNote", &["servicenote", "service_note"]),
    alias("CreatedOn", &["createdon", "created_on"]),
    alias("UpdatedOn", &["updatedon", "updated_on"]),
];

const APPOINTMENT_ALIASES: &[FieldAliases] = &[
    alias("Id", &["id"]),
    alias(CUSTOMER_REFERENCE, &["customerid", "customer_id"]),
    alias("Date", &["date", "datum"]),
    alias("DateEnd", &["dateend", "date_end", "enddate"]),
    alias("TimeStart", &["timestart", "time_start", "starttime"]),
    alias("TimeEnd", &["timeend", "time_end", "endtime"]),
    alias("ActualDuration", &["actualduration", "actual_duration"]),
    alias("AppointmentStatusId", &["appointmentstatusid", "appointment_status_id", "statusid"]),
    alias("Note", &["note", "notitie"]),
    alias("IsPaidInCash", &["ispaidincash", "is_paid_in_cash", "is paid in cash"]),
    alias("TipAmount", &["tipamount", "tip_amount", "tip"]),
    alias("CreatedOn", &["createdon", "created_on"]),
    alias("UpdatedOn", &["updatedon", "updated_on"]),
];

const FIELD_MAPS: &[(&str, &[FieldAliases])] = &[
    (CUSTOMER, CUSTOMER_ALIASES),
    (DOG, DOG_ALIASES),
    (APPOINTMENT, APPOINTMENT_ALIASES),
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldMapError {
    #[error("table {table} maps unknown field {field}")]
    UnknownField { table: String, field: String },
    #[error("alias {alias} in table {table} maps to both {first} and {second}")]
    AmbiguousAlias {
        table: String,
        alias: String,
        first: String,
        second: String,
    },
    #[error("table {table} has a field map but no schema")]
    UnknownTable { table: String },
}

type AliasIndex = HashMap<&'static str, HashMap<String, &'static str>>;

static FIELD_INDEX: Lazy<Result<AliasIndex, FieldMapError>> = Lazy::new(build_index);

fn build_index() -> Result<AliasIndex, FieldMapError> {
    let mut index = AliasIndex::new();
    for (table, fields) in FIELD_MAPS {
        let schema = schema::table_schema(table).ok_or_else(|| FieldMapError::UnknownTable {
            table: table.to_string(),
        })?;
        let mut lookup: HashMap<String, &'static str> = HashMap::new();
        for entry in fields.iter() {
            if schema.field(entry.canonical).is_none() {
                return Err(FieldMapError::UnknownField {
                    table: table.to_string(),
                    field: entry.canonical.to_string(),
                });
            }
            let spellings = std::iter::once(entry.canonical).chain(entry.aliases.iter().copied());
            for spelling in spellings {
                let key = spelling.trim().to_lowercase();
                if let Some(existing) = lookup.insert(key.clone(), entry.canonical) {
                    if existing != entry.canonical {
                        return Err(FieldMapError::AmbiguousAlias {
                            table: table.to_string(),
                            alias: key,
                            first: existing.to_string(),
                            second: entry.canonical.to_string(),
                        });
                    }
                }
            }
        }
        index.insert(*table, lookup);
    }
    Ok(index)
}

/// Checks the alias tables. Called once while the application state is built.
pub fn validate_field_maps() -> Result<(), FieldMapError> {
    FIELD_INDEX.as_ref().map(|_| ()).map_err(Clone::clone)
}

/// Canonical spelling of `key` for `table`, if the table declares one.
pub fn canonical_name(table: &str, key: &str) -> Option<&'static str> {
    let index = FIELD_INDEX.as_ref().ok()?;
    index
        .get(table)?
        .get(key.trim().to_lowercase().as_str())
        .copied()
}

/// Builds a new row with canonical keys.
///
/// Unmapped keys are kept verbatim unless they collide (ignoring case) with a
/// key that is already present. Declared schema fields that the row lacks are
/// added as explicit `null`.
pub fn canonicalize_row(table: &str, row: &NormalizedRow) -> NormalizedRow {
    let mut out = NormalizedRow::new();
    let mut unmapped = Vec::new();

    for (key, value) in row {
        match canonical_name(table, key) {
            Some(canonical) => {
                let keep_existing = out.get(canonical).map_or(false, |v| !v.is_null());
                if !keep_existing {
                    out.insert(canonical.to_string(), value.clone());
                }
            }
            None => unmapped.push((key, value)),
        }
    }

    for (key, value) in unmapped {
        if out.keys().any(|existing| existing.eq_ignore_ascii_case(key)) {
            debug!(
                target: "fourloki",
                event = "field_collision_dropped",
                table,
                field = key.as_str()
            );
            continue;
        }
        out.insert(key.clone(), value.clone());
    }

    if let Some(schema) = schema::table_schema(table) {
        for spec in schema.fields {
            out.entry(spec.name.to_string()).or_insert(Value::Null);
        }
    }
    out
}

/// First non-null customer reference under any historical spelling.
pub fn customer_reference(row: &NormalizedRow) -> Option<&Value> {
    CUSTOMER_REFERENCE_ALIASES
        .iter()
        .filter_map(|alias| row.get(*alias))
        .find(|value| !value.is_null())
}

/// Moves a `customer_id`-style value onto `CustomerId` when the canonical key is empty.
pub fn promote_customer_reference(row: NormalizedRow) -> NormalizedRow {
    let canonical_set = row
        .get(CUSTOMER_REFERENCE)
        .map_or(false, |value| !value.is_null());
    if canonical_set {
        return row;
    }
    let promoted = CUSTOMER_REFERENCE_ALIASES
        .iter()
        .filter(|alias| **alias != CUSTOMER_REFERENCE)
        .find_map(|alias| row.get(*alias).filter(|v| !v.is_null()).cloned());
    let Some(value) = promoted else {
        return row;
    };
    let mut out: NormalizedRow = row
        .into_iter()
        .filter(|(key, _)| !CUSTOMER_REFERENCE_ALIASES.contains(&key.as_str()))
        .collect();
    out.insert(CUSTOMER_REFERENCE.to_string(), value);
    out
}

/// True for a header that carries the customer reference.
pub fn is_customer_reference_header(header: &str) -> bool {
    let lowered = header.trim().to_lowercase();
    lowered == "customerid" || lowered == "customer_id"
}
