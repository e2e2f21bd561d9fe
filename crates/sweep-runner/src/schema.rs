//! Shape of the runner's result line and the fold of repeated runs into one
//! aggregate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::InvocationError;

/// Where the per-run fields live in a runner result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSchema {
    /// `{"random":..,"success":..,"queryCount":..,"symbolCount":..}`
    #[default]
    Flat,
    /// `{"config":{"random":..},"result":{"success":..,"queryCount":..,"symbolCount":..}}`
    Nested,
}

impl ResultSchema {
    /// JSON pointers of the fields that vary between repeats, in record order.
    pub fn per_run_pointers(self) -> [&'static str; 4] {
        match self {
            ResultSchema::Flat => ["/random", "/success", "/queryCount", "/symbolCount"],
            ResultSchema::Nested => [
                "/config/random",
                "/result/success",
                "/result/queryCount",
                "/result/symbolCount",
            ],
        }
    }
}

/// One decoded runner result, already checked against a [`ResultSchema`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    value: Value,
}

impl RunResult {
    /// Parses the last non-empty line of `stdout`. Earlier lines are runner
    /// diagnostics and are ignored.
    pub fn parse(schema: ResultSchema, stdout: &[u8]) -> Result<Self, InvocationError> {
        let text = String::from_utf8_lossy(stdout);
        let line = text
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or(InvocationError::EmptyOutput)?;
        let value: Value =
            serde_json::from_str(line).map_err(|source| InvocationError::MalformedJson {
                line: truncate(line, 200),
                source,
            })?;
        Self::from_value(schema, value)
    }

    pub fn from_value(schema: ResultSchema, value: Value) -> Result<Self, InvocationError> {
        if !value.is_object() {
            return Err(InvocationError::NotAnObject {
                found: json_kind(&value),
            });
        }
        for pointer in schema.per_run_pointers() {
            if value.pointer(pointer).is_none() {
                return Err(InvocationError::MissingField {
                    pointer: pointer.to_string(),
                });
            }
        }
        Ok(Self { value })
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }
}

/// Result of one sweep point: the first run verbatim, with every per-run
/// field replaced by the ordered list of values across all repeats.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AggregateResult {
    value: Value,
    #[serde(skip)]
    runs: usize,
}

impl AggregateResult {
    pub fn runs(&self) -> usize {
        self.runs
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

pub struct Aggregator {
    schema: ResultSchema,
    value: Value,
    runs: usize,
}

impl Aggregator {
    /// Starts from a copy of `first` with empty sequences at the per-run fields.
    /// `first` itself still has to be pushed.
    pub fn seed(schema: ResultSchema, first: &RunResult) -> Self {
        let mut value = first.value.clone();
        for pointer in schema.per_run_pointers() {
            if let Some(slot) = value.pointer_mut(pointer) {
                *slot = Value::Array(Vec::new());
            }
        }
        Self {
            schema,
            value,
            runs: 0,
        }
    }

    pub fn push(&mut self, run: &RunResult) -> Result<(), InvocationError> {
        for pointer in self.schema.per_run_pointers() {
            let field = run
                .value
                .pointer(pointer)
                .cloned()
                .ok_or_else(|| InvocationError::MissingField {
                    pointer: pointer.to_string(),
                })?;
            match self.value.pointer_mut(pointer) {
                Some(Value::Array(values)) => values.push(field),
                _ => {
                    return Err(InvocationError::MissingField {
                        pointer: pointer.to_string(),
                    })
                }
            }
        }
        self.runs += 1;
        Ok(())
    }

    pub fn finish(self) -> AggregateResult {
        AggregateResult {
            value: self.value,
            runs: self.runs,
        }
    }
}

/// Folds `runs` in order. Returns `None` for an empty slice.
pub fn aggregate(
    schema: ResultSchema,
    runs: &[RunResult],
) -> Result<Option<AggregateResult>, InvocationError> {
    let Some(first) = runs.first() else {
        return Ok(None);
    };
    let mut aggregator = Aggregator::seed(schema, first);
    for run in runs {
        aggregator.push(run)?;
    }
    Ok(Some(aggregator.finish()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truncate(line: &str, max_chars: usize) -> String {
    if line.chars().count() <= max_chars {
        line.to_string()
    } else {
        let mut out: String = line.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}
