#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

/// Increments a counter or gauge by one.
///
/// Label pairs are passed as `"key" => value`.
#[macro_export]
macro_rules! inc {
    ($instrument:ident, $metric:expr $(, $label_key:expr => $label_value:expr)* $(,)?) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric $(, $label_key => $label_value)*).increment(1);
    };
}

/// Sets a gauge to the given value.
///
/// Accepts either no label or a single `key, value` label before the amount.
#[macro_export]
macro_rules! set {
    ($instrument:ident, $metric:expr, $key:expr, $label:expr, $value:expr $(,)?) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric, $key => $label).set($value);
    };
    ($instrument:ident, $metric:expr, $value:expr $(,)?) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric).set($value);
    };
}

/// Records a value into a histogram.
#[macro_export]
macro_rules! record {
    ($instrument:ident, $metric:expr, $key:expr, $label:expr, $value:expr $(,)?) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric, $key => $label).record($value);
    };
    ($instrument:ident, $metric:expr, $value:expr $(,)?) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric).record($value);
    };
}

#[cfg(test)]
mod tests {
    #[allow(dead_code)]
    const NAME: &str = "tiller_macros_test";

    #[cfg(not(feature = "metrics"))]
    #[test]
    fn macros_expand_without_feature() {
        let _label = "forkchoice-update";
        inc!(counter, NAME, "event" => _label);
        set!(gauge, NAME, 1.0);
        set!(gauge, NAME, "kind", "unsafe", 2.0);
        record!(histogram, NAME, 0.5);
        record!(histogram, NAME, "method", "new_payload", 0.25);
    }

    #[cfg(feature = "metrics")]
    mod recorded {
        use super::NAME;
        use metrics::{
            Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
        };
        use std::{
            collections::HashMap,
            sync::{
                Arc, Mutex,
                atomic::{AtomicU64, Ordering},
            },
        };

        /// Keeps counters and gauges by rendered key so tests can read them back.
        #[derive(Default)]
        struct CapturingRecorder {
            values: Mutex<HashMap<String, Arc<AtomicU64>>>,
        }

        impl CapturingRecorder {
            fn slot(&self, key: &Key) -> Arc<AtomicU64> {
                let mut rendered = key.name().to_string();
                for label in key.labels() {
                    rendered.push_str(&format!(",{}={}", label.key(), label.value()));
                }
                Arc::clone(self.values.lock().unwrap().entry(rendered).or_default())
            }

            fn get(&self, key: &str) -> u64 {
                self.values.lock().unwrap()[key].load(Ordering::SeqCst)
            }
        }

        impl Recorder for CapturingRecorder {
            fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
            fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
            fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

            fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
                Counter::from_arc(self.slot(key))
            }

            fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
                Gauge::from_arc(self.slot(key))
            }

            fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
                Histogram::noop()
            }
        }

        #[test]
        fn macros_update_the_installed_recorder() {
            let recorder = CapturingRecorder::default();
            metrics::with_local_recorder(&recorder, || {
                let label = "forkchoice-update";
                inc!(counter, NAME, "event" => label);
                inc!(counter, NAME, "event" => label);
                set!(gauge, "tiller_macros_gauge", 1.5);
                set!(gauge, "tiller_macros_gauge", "kind", "unsafe", 7.0);
                record!(histogram, "tiller_macros_histogram", 0.5);
                record!(histogram, "tiller_macros_histogram", "method", "new_payload", 0.25);
            });

            assert_eq!(recorder.get("tiller_macros_test,event=forkchoice-update"), 2);
            assert_eq!(f64::from_bits(recorder.get("tiller_macros_gauge")), 1.5);
            assert_eq!(f64::from_bits(recorder.get("tiller_macros_gauge,kind=unsafe")), 7.0);
        }
    }
}
