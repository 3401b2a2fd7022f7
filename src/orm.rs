//! Normalization between tabular data and record sequences.
//!
//! - [`normalize`]: any [`Payload`] shape into an ordered `Vec<Item>`
//! - [`denormalize`]: items back into a [`DataSet`]
//! - [`should_keep`]: the relay policy applied to raw operation output before normalization

use crate::record::{INDEX_FIELD, Item, Payload, Record};
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Column name used for bare values when rebuilding a table.
pub const VALUE_FIELD: &str = "value";

/// Convert `payload` into an ordered sequence of items.
///
/// - `Table` with at least one row and one column: one record per row with fields
///   `index_record` + column names; `extra_fields` are merged onto every record.
/// - `Table` with no rows or no columns: empty.
/// - `Record`: a one-element sequence.
/// - `Records` / `List`: passed through unchanged (no per-element coercion).
/// - `Scalar`: a one-element sequence.
pub fn normalize(payload: Payload, extra_fields: Option<&Record>) -> Vec<Item> {
    match payload {
        Payload::Table(ds) if ds.is_empty() => Vec::new(),
        Payload::Table(ds) => records_from_table(ds, extra_fields),
        Payload::Record(r) => vec![Item::Record(r)],
        Payload::Records(rs) => rs.into_iter().map(Item::Record).collect(),
        Payload::List(items) => items,
        Payload::Scalar(v) => vec![Item::Value(v)],
    }
}

fn records_from_table(ds: DataSet, extra_fields: Option<&Record>) -> Vec<Item> {
    let DataSet { schema, rows } = ds;
    rows.into_iter()
        .enumerate()
        .map(|(idx, row)| {
            let mut record = Record::new();
            record.set(INDEX_FIELD, Value::Int64(idx as i64));
            // Row values are padded with nulls if a row is shorter than the schema.
            let mut values = row.into_iter();
            for field in &schema.fields {
                record.set(field.name.clone(), values.next().unwrap_or(Value::Null));
            }
            if let Some(extra) = extra_fields {
                record.update(extra.iter().map(|(k, v)| (k, v.clone())));
            }
            Item::Record(record)
        })
        .collect()
}

/// Rebuild a table from `items`.
///
/// Columns are the union of all record fields in first-seen order; fields missing on a record
/// become [`Value::Null`]. Bare values go into a `value` column. Column types are taken from the
/// first non-null value in each column ([`DataType::Utf8`] if every value is null).
pub fn denormalize(items: &[Item]) -> DataSet {
    let mut names: Vec<String> = Vec::new();
    for item in items {
        match item {
            Item::Record(r) => {
                for key in r.keys() {
                    if !names.iter().any(|n| n == key) {
                        names.push(key.to_string());
                    }
                }
            }
            Item::Value(_) => {
                if !names.iter().any(|n| n == VALUE_FIELD) {
                    names.push(VALUE_FIELD.to_string());
                }
            }
        }
    }

    let rows: Vec<Vec<Value>> = items
        .iter()
        .map(|item| {
            names
                .iter()
                .map(|name| match item {
                    Item::Record(r) => r.get(name).cloned().unwrap_or(Value::Null),
                    Item::Value(v) if name == VALUE_FIELD => v.clone(),
                    Item::Value(_) => Value::Null,
                })
                .collect()
        })
        .collect();

    let fields = names
        .into_iter()
        .enumerate()
        .map(|(col, name)| {
            let data_type = rows
                .iter()
                .find_map(|row| row[col].data_type())
                .unwrap_or(DataType::Utf8);
            Field::new(name, data_type)
        })
        .collect();

    DataSet::new(Schema::new(fields), rows)
}

/// Relay policy: decide whether a raw operation result survives into the next generation.
///
/// Tables survive when they have at least one row and one column; everything else survives when
/// it is truthy (see [`Payload::is_truthy`]).
pub fn should_keep(payload: &Payload) -> bool {
    match payload {
        Payload::Table(ds) => !ds.is_empty(),
        other => other.is_truthy(),
    }
}
