//! Configuration pretty-printing

use super::Manager;
use crate::cli::styles::use_colours;

use figment::{Metadata, value::Value};
use heck::ToUpperCamelCase;
use serde::Deserialize;
use std::{
    collections::BTreeSet,
    fmt::Display,
    sync::LazyLock,
};
use struct_field_names_as_array::FieldNamesAsSlice;
use tabled::{
    Table, Tabled,
    settings::{Color, Theme, object::Columns, style::Style},
};

static TABLE_STYLE: LazyLock<Theme> = LazyLock::new(|| {
    if cfg!(windows) {
        Style::psql().into()
    } else {
        Style::sharp().into()
    }
});

/// Data type used when rendering the config table
#[derive(Tabled)]
struct PrettyConfig {
    field: String,
    value: String,
    source: String,
}

impl PrettyConfig {
    fn render_source(meta: Option<&Metadata>) -> String {
        if let Some(m) = meta {
            m.source
                .as_ref()
                .map_or_else(|| m.name.to_string(), figment::Source::to_string)
        } else {
            String::new()
        }
    }

    fn render_value(value: &Value) -> String {
        match value {
            Value::String(_tag, s) => s.to_string(),
            Value::Char(_tag, c) => c.to_string(),
            Value::Bool(_tag, b) => b.to_string(),
            Value::Num(_tag, num) => num
                .to_i128()
                .map(|i| i.to_string())
                .or_else(|| num.to_u128().map(|u| u.to_string()))
                .or_else(|| num.to_f64().map(|f| f.to_string()))
                .unwrap_or_default(),
            Value::Empty(_tag, _) => "<empty>".into(),
            Value::Dict(_tag, dict) => format!(
                "{{{}}}",
                dict.iter()
                    .map(|(k, v)| format!("{k}={}", PrettyConfig::render_value(v)))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            Value::Array(_tag, vec) => format!(
                "[{}]",
                vec.iter()
                    .map(PrettyConfig::render_value)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        }
    }

    fn new<F: Into<String>>(field: F, value: &Value, meta: Option<&Metadata>) -> Self {
        Self {
            field: field.into(),
            value: PrettyConfig::render_value(value),
            source: PrettyConfig::render_source(meta),
        }
    }
}

/// Pretty-printing type wrapper to Manager
#[derive(Debug)]
pub struct DisplayAdapter<'a> {
    /// Data source
    source: &'a Manager,
    /// The fields we want to output, in order
    fields: BTreeSet<&'static str>,
}

impl Manager {
    /// Creates a `DisplayAdapter` for this struct with the given options.
    ///
    /// # Returns
    /// An ephemeral structure implementing `Display`.
    #[must_use]
    pub fn to_display_adapter<'de, T>(&self) -> DisplayAdapter<'_>
    where
        T: Deserialize<'de> + FieldNamesAsSlice,
    {
        DisplayAdapter {
            source: self,
            fields: T::FIELD_NAMES_AS_SLICE.iter().copied().collect(),
        }
    }
}

impl Display for DisplayAdapter<'_> {
    /// Formats the fields of the configuration with their values and where each came from.
    ///
    /// N.B. This function uses CLI styling.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = &self.source.data;

        let output = self
            .fields
            .iter()
            .filter_map(|field| {
                let value = data.find_value(field).ok()?;
                let meta = data.get_metadata(value.tag());
                Some(PrettyConfig::new(field.to_upper_camel_case(), &value, meta))
            })
            .collect::<Vec<_>>();
        let mut writable = Table::new(output);
        let _ = writable.with(TABLE_STYLE.clone());
        if use_colours() {
            let _ = writable.modify(Columns::single(1), Color::FG_CYAN);
        }
        write!(f, "{writable}")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use crate::config::{Configuration, ConfigurationOverrides, Manager};

    use assertables::assert_contains;

    #[test]
    fn shows_fields_and_sources() {
        let mut mgr = Manager::without_files();
        mgr.merge_overrides(&ConfigurationOverrides {
            port: Some(1234),
            ..Default::default()
        });
        let s = mgr.to_display_adapter::<Configuration>().to_string();
        for field in ["Listen", "Port", "Engine", "CacheDir", "TimeFormat"] {
            assert_contains!(s, field);
        }
        assert_contains!(s, "1234");
        assert_contains!(s, "cache");
    }
}
