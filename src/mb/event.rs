//! Events produced by metricsets and the shippable form they are turned into.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::BoxError;

/// JSON object used for event payloads.
pub type Fields = Map<String, Value>;

/// Hook run on every event before it is turned into a [`BeatEvent`].
///
/// Called with the module name, the metricset name and the event.
pub type EventModifier = Arc<dyn Fn(&str, &str, &mut Event) + Send + Sync>;

/// Legacy map key whose object value becomes the module fields.
pub const MODULE_DATA_KEY: &str = "_module";
/// Legacy map key whose string value becomes the namespace suffix.
pub const NAMESPACE_KEY: &str = "_namespace";
/// Legacy map key whose string value becomes the document id.
pub const ID_KEY: &str = "_id";
/// Legacy map key holding an RFC 3339 timestamp.
pub const TIMESTAMP_KEY: &str = "@timestamp";

/// A single measurement reported by a metricset.
///
/// Unset fields are filled in by the reporter: a missing timestamp, host or
/// namespace and a zero `took` all receive defaults from the running worker.
#[derive(Debug, Default)]
pub struct Event {
    /// Fields placed at the root of the output document.
    pub root_fields: Fields,
    /// Fields placed under the module name.
    pub module_fields: Fields,
    /// Fields placed under the namespace path.
    pub metric_set_fields: Fields,
    /// Dotted path for `metric_set_fields`, `<module>.<metricset>` when empty.
    pub namespace: String,
    /// Optional document id.
    pub id: Option<String>,
    /// Measurement time.
    pub timestamp: Option<DateTime<Utc>>,
    /// Time spent producing the measurement.
    pub took: Duration,
    /// Polling period, set only for polled metricsets.
    pub period: Option<Duration>,
    /// Host the measurement was taken from.
    pub host: String,
    /// Error encountered while producing the measurement.
    pub error: Option<BoxError>,
}

impl Event {
    /// Event carrying `fields` as its metricset payload.
    pub fn new(metric_set_fields: Fields) -> Self {
        Self {
            metric_set_fields,
            ..Default::default()
        }
    }

    /// Event reporting only an error.
    pub fn from_error(error: impl Into<BoxError>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Set the root fields.
    pub fn with_root_fields(mut self, fields: Fields) -> Self {
        self.root_fields = fields;
        self
    }

    /// Set the module fields.
    pub fn with_module_fields(mut self, fields: Fields) -> Self {
        self.module_fields = fields;
        self
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the elapsed fetch time.
    pub fn with_took(mut self, took: Duration) -> Self {
        self.took = took;
        self
    }

    /// Set the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the error.
    pub fn with_error(mut self, error: impl Into<BoxError>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Apply `modifiers` in order and build the shippable event.
    pub fn into_beat_event(
        mut self,
        module: &str,
        metric_set: &str,
        modifiers: &[EventModifier],
    ) -> BeatEvent {
        for modifier in modifiers {
            modifier(module, metric_set, &mut self);
        }

        let namespace = if self.namespace.is_empty() {
            format!("{module}.{metric_set}")
        } else {
            self.namespace
        };

        let mut fields = self.root_fields;
        if !self.module_fields.is_empty() {
            put_value(&mut fields, module, Value::Object(self.module_fields));
        }
        if !self.metric_set_fields.is_empty() {
            put_value(&mut fields, &namespace, Value::Object(self.metric_set_fields));
        }

        put_value(&mut fields, "event.module", Value::from(module));
        put_value(&mut fields, "event.dataset", Value::from(namespace));
        put_value(&mut fields, "metricset.name", Value::from(metric_set));

        if !self.host.is_empty() {
            put_value(&mut fields, "service.address", Value::from(self.host));
        }
        if !self.took.is_zero() {
            let nanos = u64::try_from(self.took.as_nanos()).unwrap_or(u64::MAX);
            put_value(&mut fields, "event.duration", Value::from(nanos));
        }
        if let Some(period) = self.period {
            let millis = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
            put_value(&mut fields, "metricset.period", Value::from(millis));
        }
        if let Some(error) = self.error {
            put_value(&mut fields, "error.message", Value::from(error.to_string()));
        }

        let meta = self.id.map(|id| {
            let mut meta = Fields::new();
            meta.insert(ID_KEY.to_owned(), Value::from(id));
            meta
        });

        BeatEvent {
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            meta,
            fields,
        }
    }
}

/// Event modifier that records the module name as `service.type`.
pub fn add_service_type(module: &str, _metric_set: &str, event: &mut Event) {
    put_value(&mut event.root_fields, "service.type", Value::from(module));
}

/// Build an [`Event`] from a legacy flat field map.
///
/// The special keys [`TIMESTAMP_KEY`], [`MODULE_DATA_KEY`], [`NAMESPACE_KEY`]
/// and [`ID_KEY`] are lifted out of the map; everything else becomes the
/// metricset payload. A namespace given in the map is relative to `module`.
pub fn transform_map_to_event(module: &str, mut fields: Fields, error: Option<BoxError>) -> Event {
    let mut event = Event {
        error,
        ..Default::default()
    };

    if let Some(raw) = fields.remove(TIMESTAMP_KEY) {
        match raw
            .as_str()
            .map(DateTime::<FixedOffset>::parse_from_rfc3339)
            .transpose()
        {
            Ok(Some(ts)) => event.timestamp = Some(ts.with_timezone(&Utc)),
            Ok(None) | Err(_) => {
                tracing::debug!(module, value = %raw, "Ignoring unparseable event timestamp");
            }
        }
    }

    if let Some(Value::Object(module_fields)) = fields.remove(MODULE_DATA_KEY) {
        event.module_fields = module_fields;
    }

    if let Some(Value::String(namespace)) = fields.remove(NAMESPACE_KEY) {
        event.namespace = format!("{module}.{namespace}");
    }

    if let Some(Value::String(id)) = fields.remove(ID_KEY) {
        event.id = Some(id);
    }

    event.metric_set_fields = fields;
    event
}

/// The shippable form of an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeatEvent {
    /// Event time.
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Out-of-band metadata such as the document id.
    #[serde(rename = "@metadata", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Fields>,
    /// Document fields.
    #[serde(flatten)]
    pub fields: Fields,
}

impl BeatEvent {
    /// Look up a value by dotted path, e.g. `metricset.period`.
    pub fn get_value(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        segments.try_fold(self.fields.get(first)?, |value, segment| {
            value.as_object()?.get(segment)
        })
    }
}

/// Insert `value` at a dotted `path`, creating intermediate objects.
///
/// Intermediate values that are not objects are replaced.
pub fn put_value(fields: &mut Fields, path: &str, value: Value) {
    let mut current = fields;
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_owned(), value);
            return;
        }

        let slot = current
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Fields::new()));
        if !slot.is_object() {
            *slot = Value::Object(Fields::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
}
