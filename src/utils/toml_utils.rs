use anyhow::Result;

use crate::errors::ClearupError;

pub(crate) fn get_value(
    table: &mut toml::value::Table,
    key: &str,
    path: &str,
) -> Result<toml::Value> {
    table
        .remove(key)
        .ok_or_else(|| ClearupError::MissingKey(path.to_owned() + key).into())
}

pub(crate) fn get_string(table: &mut toml::value::Table, key: &str, path: &str) -> Result<String> {
    get_value(table, key, path).and_then(|v| {
        if let toml::Value::String(s) = v {
            Ok(s)
        } else {
            Err(ClearupError::ExpectedType("string", path.to_owned() + key).into())
        }
    })
}

pub(crate) fn get_integer(table: &mut toml::value::Table, key: &str, path: &str) -> Result<i64> {
    get_value(table, key, path).and_then(|v| {
        if let toml::Value::Integer(i) = v {
            Ok(i)
        } else {
            Err(ClearupError::ExpectedType("integer", path.to_owned() + key).into())
        }
    })
}

pub(crate) fn get_opt_bool(
    table: &mut toml::value::Table,
    key: &str,
    path: &str,
) -> Result<Option<bool>> {
    match table.remove(key) {
        Some(toml::Value::Boolean(b)) => Ok(Some(b)),
        Some(_) => Err(ClearupError::ExpectedType("bool", path.to_owned() + key).into()),
        None => Ok(None),
    }
}

/// A missing array reads as empty, matching optional list fields.
pub(crate) fn get_array(
    table: &mut toml::value::Table,
    key: &str,
    path: &str,
) -> Result<toml::value::Array> {
    if let Some(v) = table.remove(key) {
        if let toml::Value::Array(a) = v {
            Ok(a)
        } else {
            Err(ClearupError::ExpectedType("array", path.to_owned() + key).into())
        }
    } else {
        Ok(toml::value::Array::new())
    }
}

pub(crate) fn get_string_array(
    table: &mut toml::value::Table,
    key: &str,
    path: &str,
) -> Result<Vec<String>> {
    let array = get_array(table, key, path)?;
    let mut result = Vec::with_capacity(array.len());
    for v in array {
        if let toml::Value::String(s) = v {
            result.push(s);
        } else {
            return Err(ClearupError::ExpectedType("string", path.to_owned() + key).into());
        }
    }
    Ok(result)
}
