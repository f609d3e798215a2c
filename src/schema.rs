//! Declared shape of every table the backup engine knows about.
//!
//! Only `Customer`, `Dog` and `Appointment` carry field rules. The remaining
//! mutable tables are exported and imported as-is.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum FieldType {
    String,
    Number,
    Date,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub max_length: Option<usize>,
}

impl FieldSpec {
    const fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: false,
            max_length: None,
        }
    }

    const fn string(name: &'static str, max_length: usize) -> Self {
        Self {
            name,
            field_type: FieldType::String,
            required: false,
            max_length: Some(max_length),
        }
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub table: &'static str,
    pub fields: &'static [FieldSpec],
}

impl TableSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|spec| spec.name.eq_ignore_ascii_case(name))
    }
}

pub const CUSTOMER: &str = "Customer";
pub const DOG: &str = "Dog";
pub const APPOINTMENT: &str = "Appointment";

/// Tables that hold business data, parents before children.
pub const MUTABLE_TABLES: &[&str] = &[
    CUSTOMER,
    DOG,
    APPOINTMENT,
    "AppointmentDog",
    "ServiceAppointmentDog",
    "Invoice",
    "InvoiceLine",
];

const CUSTOMER_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("Id", FieldType::Number),
    FieldSpec::string("Naam", 255).required(),
    FieldSpec::string("Contactpersoon", 255),
    FieldSpec::string("Emailadres", 255),
    FieldSpec::string("Telefoon", 50),
    FieldSpec::string("Adres", 255),
    FieldSpec::string("Postcode", 10),
    FieldSpec::string("Woonplaats", 255),
    FieldSpec::string("Notities", 2000),
    FieldSpec::new("IsAllowContactShare", FieldType::Boolean),
    FieldSpec::new("CreatedOn", FieldType::Date),
    FieldSpec::new("UpdatedOn", FieldType::Date),
];

// CustomerId presence is enforced by the reference rule, not the required flag.
const DOG_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("Id", FieldType::Number),
    FieldSpec::new("CustomerId", FieldType::Number),
    FieldSpec::string("Name", 255).required(),
    FieldSpec::new("DogBreedId", FieldType::Number),
    FieldSpec::new("DogSizeId", FieldType::Number),
    FieldSpec::new("Birthday", FieldType::Date),
    FieldSpec::string("Allergies", 1000),
    FieldSpec::string("ServiceNote", 1000),
    FieldSpec::new("CreatedOn", FieldType::Date),
    FieldSpec::new("UpdatedOn", FieldType::Date),
];

// TimeStart/TimeEnd presence is enforced by the appointment time rule.
const APPOINTMENT_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("Id", FieldType::Number),
    FieldSpec::new("CustomerId", FieldType::Number),
    FieldSpec::new("Date", FieldType::Date).required(),
    FieldSpec::new("DateEnd", FieldType::Date),
    FieldSpec::string("TimeStart", 8),
    FieldSpec::string("TimeEnd", 8),
    FieldSpec::new("ActualDuration", FieldType::Number),
    FieldSpec::new("AppointmentStatusId", FieldType::Number),
    FieldSpec::string("Note", 2000),
    FieldSpec::new("IsPaidInCash", FieldType::Boolean),
    FieldSpec::new("TipAmount", FieldType::Number),
    FieldSpec::new("CreatedOn", FieldType::Date),
    FieldSpec::new("UpdatedOn", FieldType::Date),
];

const SCHEMAS: &[TableSchema] = &[
    TableSchema {
        table: CUSTOMER,
        fields: CUSTOMER_FIELDS,
    },
    TableSchema {
        table: DOG,
        fields: DOG_FIELDS,
    },
    TableSchema {
        table: APPOINTMENT,
        fields: APPOINTMENT_FIELDS,
    },
];

/// How the validator should treat rows of a given table.
#[derive(Debug, Clone, Copy)]
pub enum TableRules {
    Declared(&'static TableSchema),
    Passthrough,
}

pub fn table_schema(table: &str) -> Option<&'static TableSchema> {
    SCHEMAS.iter().find(|schema| schema.table == table)
}

pub fn table_rules(table: &str) -> Option<TableRules> {
    if let Some(schema) = table_schema(table) {
        return Some(TableRules::Declared(schema));
    }
    if MUTABLE_TABLES.contains(&table) {
        return Some(TableRules::Passthrough);
    }
    None
}

/// Resolves a sheet or request table name to its canonical spelling.
pub fn resolve_table(name: &str) -> Option<&'static str> {
    let trimmed = name.trim();
    MUTABLE_TABLES
        .iter()
        .copied()
        .find(|table| table.eq_ignore_ascii_case(trimmed))
}

const CUSTOMER_RANK: u16 = 0;
const DOG_RANK: u16 = 10;
const APPOINTMENT_RANK: u16 = 20;
const APPOINTMENT_CHILD_RANK: u16 = 30;
const INVOICE_RANK: u16 = 40;
const INVOICE_CHILD_RANK: u16 = 50;
const DEFAULT_RANK: u16 = 1000;

pub(crate) fn table_order_key(table: &str) -> (u16, &str) {
    let rank = match table {
        CUSTOMER => CUSTOMER_RANK,
        DOG => DOG_RANK,
        APPOINTMENT => APPOINTMENT_RANK,
        "AppointmentDog" => APPOINTMENT_CHILD_RANK,
        "ServiceAppointmentDog" => APPOINTMENT_CHILD_RANK + 1,
        "Invoice" => INVOICE_RANK,
        "InvoiceLine" => INVOICE_CHILD_RANK,
        _ => DEFAULT_RANK,
    };

    (rank, table)
}

/// Mutable tables ordered so that children come before their parents.
pub fn clear_order() -> Vec<&'static str> {
    let mut tables = MUTABLE_TABLES.to_vec();
    tables.sort_by(|a, b| table_order_key(b).cmp(&table_order_key(a)));
    tables
}
