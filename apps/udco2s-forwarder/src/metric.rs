use crate::sample::Sample;
use serde::{Deserialize, Serialize};

pub const CO2_METRIC: &str = "co2.metric";
pub const HUMIDITY_METRIC: &str = "humidity.metric";
pub const TEMPERATURE_METRIC: &str = "temperature.metric";

/// Graphite JSON ingestion point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(rename = "interval")]
    pub interval_secs: i64,
    pub value: f64,
    pub tags: Vec<String>,
    pub time: i64,
}

#[derive(Debug, Clone)]
pub struct MetricTemplate {
    pub interval_secs: i64,
    pub source_tag: String,
}

impl MetricTemplate {
    fn point(&self, name: &str, value: f64, time: i64) -> Metric {
        Metric {
            name: name.to_string(),
            interval_secs: self.interval_secs,
            value,
            tags: vec![self.source_tag.clone()],
            time,
        }
    }
}

/// Expands every sample into co2, humidity and temperature points, in that order.
pub fn expand_samples(samples: &[Sample], template: &MetricTemplate) -> Vec<Metric> {
    let mut metrics = Vec::with_capacity(samples.len() * 3);
    for sample in samples {
        let status = &sample.status;
        metrics.push(template.point(CO2_METRIC, parse_value(CO2_METRIC, &status.co2_ppm), sample.time));
        metrics.push(template.point(
            HUMIDITY_METRIC,
            parse_value(HUMIDITY_METRIC, &status.humidity),
            sample.time,
        ));
        metrics.push(template.point(
            TEMPERATURE_METRIC,
            parse_value(TEMPERATURE_METRIC, &status.temperature),
            sample.time,
        ));
    }
    metrics
}

// Unparseable fields become 0.0; one bad reading must not drop the whole batch.
fn parse_value(name: &str, raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => {
            tracing::debug!(metric = name, raw, "unparseable sample field; using 0");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SensorStatus;
    use serde_json::json;

    fn template() -> MetricTemplate {
        MetricTemplate {
            interval_secs: 10,
            source_tag: "source=udco2s".to_string(),
        }
    }

    fn sample(time: i64, co2: &str, hum: &str, tmp: &str) -> Sample {
        Sample {
            time,
            status: SensorStatus {
                co2_ppm: co2.to_string(),
                humidity: hum.to_string(),
                temperature: tmp.to_string(),
            },
        }
    }

    #[test]
    fn each_sample_yields_three_points_in_order() {
        let samples = vec![
            sample(100, "450", "55.2", "21.3"),
            sample(101, "460", "55.0", "-1.5"),
        ];
        let metrics = expand_samples(&samples, &template());
        assert_eq!(metrics.len(), 6);

        let names: Vec<&str> = metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                CO2_METRIC,
                HUMIDITY_METRIC,
                TEMPERATURE_METRIC,
                CO2_METRIC,
                HUMIDITY_METRIC,
                TEMPERATURE_METRIC
            ]
        );
        assert!(metrics[..3].iter().all(|m| m.time == 100));
        assert!(metrics[3..].iter().all(|m| m.time == 101));
        assert!(metrics
            .iter()
            .all(|m| m.tags == vec!["source=udco2s".to_string()] && m.interval_secs == 10));
        assert_eq!(metrics[0].value, 450.0);
        assert_eq!(metrics[1].value, 55.2);
        assert_eq!(metrics[5].value, -1.5);
    }

    #[test]
    fn unparseable_fields_default_to_zero_without_dropping_batch() {
        let samples = vec![
            sample(1, "n/a", "55.2", ""),
            sample(2, "500", "50.0", "20.0"),
        ];
        let metrics = expand_samples(&samples, &template());
        assert_eq!(metrics.len(), 6);
        assert_eq!(metrics[0].value, 0.0);
        assert_eq!(metrics[1].value, 55.2);
        assert_eq!(metrics[2].value, 0.0);
        assert_eq!(metrics[3].value, 500.0);
    }

    #[test]
    fn serializes_graphite_field_names() {
        let metrics = expand_samples(&[sample(1_700_000_000, "450", "55.2", "21.3")], &template());
        let value = serde_json::to_value(&metrics[0]).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "co2.metric",
                "interval": 10,
                "value": 450.0,
                "tags": ["source=udco2s"],
                "time": 1_700_000_000
            })
        );
    }

    #[test]
    fn empty_input_yields_no_metrics() {
        assert!(expand_samples(&[], &template()).is_empty());
    }
}
