// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Prometheus helpers: a registry tolerating repeated registrations and a macro for declaring
//! metric sets.

use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, Mutex},
};

use prometheus::{core::Collector, proto::MetricFamily};

/// Errors returned by [`Registry::get_or_register`].
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// A collector with the same ID was registered with a different type.
    #[error("a collector with the same ID was already registered but with a different type")]
    InconsistentType,
    /// Some but not all of the collector's metrics are already registered.
    #[error("at least one metric in the collector has already been registered")]
    MetricsOverlap,
    /// An error raised by the inner [`prometheus::Registry`].
    #[error(transparent)]
    Prometheus(prometheus::Error),
}

/// A wrapper around [`prometheus::Registry`] that hands back the already registered collector
/// when the same collector is registered twice.
///
/// This lets several clients in one process create their metric sets on a shared registry.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: prometheus::Registry,
    collectors_by_id: Arc<Mutex<HashMap<u64, Box<dyn Any + Send>>>>,
}

impl Registry {
    /// Wraps the provided [`prometheus::Registry`].
    pub fn new(inner: prometheus::Registry) -> Self {
        Self {
            inner,
            collectors_by_id: Default::default(),
        }
    }

    /// Registers `collector`, or returns the equal collector registered before.
    #[must_use = "the returned collector may differ from the one passed in"]
    pub fn get_or_register<T>(&self, collector: T) -> Result<T, RegistrationError>
    where
        T: Collector + Send + Clone + 'static,
    {
        let collector_id = Self::collector_id(&collector);
        let mut collectors_by_id = self
            .collectors_by_id
            .lock()
            .expect("critical section shouldnt panic");

        match self.inner.register(Box::new(collector.clone())) {
            Ok(()) => {
                collectors_by_id.insert(collector_id, Box::new(collector.clone()));
                Ok(collector)
            }
            Err(prometheus::Error::AlreadyReg) => collectors_by_id
                .get(&collector_id)
                .ok_or(RegistrationError::MetricsOverlap)?
                .downcast_ref::<T>()
                .cloned()
                .ok_or(RegistrationError::InconsistentType),
            Err(other) => Err(RegistrationError::Prometheus(other)),
        }
    }

    /// Calls [`prometheus::Registry::gather`].
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.inner.gather()
    }

    /// Returns the wrapped registry.
    pub fn inner(&self) -> &prometheus::Registry {
        &self.inner
    }

    // Mirrors how `prometheus::Registry::register` derives collector IDs.
    fn collector_id<T: Collector>(collector: &T) -> u64 {
        collector
            .desc()
            .into_iter()
            .fold(0u64, |collector_id, desc| collector_id.wrapping_add(desc.id))
    }
}

/// Defines a struct holding a set of prometheus metrics registered under a common namespace.
///
/// # Example
///
/// ```ignore
/// testtube_utils::define_metric_set! {
///     #[namespace = "testtube"]
///     /// Docstring applied to the containing struct.
///     pub struct MyMetricSet {
///         #[help = "Help text and docstring for this metric"]
///         my_int_counter: IntCounter[],
///         #[help = "Vec metrics list their label names"]
///         int_counter_vec: IntCounterVec["label1", "label2"],
///         #[help = "Histograms may specify buckets"]
///         my_histogram_vec: HistogramVec{labels: ["label"], buckets: vec![0.1, 1.0]},
///     }
/// }
/// ```
#[macro_export]
macro_rules! define_metric_set {
    (
        #[namespace = $namespace:literal]
        $(#[$outer:meta])*
        $vis:vis struct $name:ident {
            $(
                #[help = $help_str:literal]
                $field_name:ident: $field_type:ident $field_def:tt
            ),* $(,)?
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone)]
        $vis struct $name {
            $(
                #[doc = $help_str]
                pub $field_name: ::prometheus::$field_type,
            )*
        }

        impl $name {
            /// The namespace in which the metrics reside.
            pub const NAMESPACE: &'static str = $namespace;

            /// Creates the metric set, registering its metrics on `registry`.
            ///
            /// # Panics
            ///
            /// Panics if a metric with the same name but a different type or label set is
            /// already registered.
            pub fn new(registry: &$crate::metrics::Registry) -> Self {
                Self { $(
                    $field_name: {
                        let opts = ::prometheus::Opts::new(stringify!($field_name), $help_str)
                            .namespace($namespace);
                        let metric = $crate::create_metric!($field_type, opts, $field_def);
                        registry.get_or_register(metric)
                            .expect("metrics defined at compile time must be valid")
                    },
                )* }
            }
        }
    };
}

/// Creates a single metric from its options; used by [`define_metric_set!`].
#[macro_export]
macro_rules! create_metric {
    ($field_type:ident, $opts:expr, []) => {{
        ::prometheus::$field_type::with_opts($opts.into())
            .expect("this must be called with valid metrics type and options")
    }};
    (HistogramVec, $opts:expr, {labels: $label_names:expr, buckets: $buckets:expr $(,)?}) => {{
        let mut opts: ::prometheus::HistogramOpts = $opts.into();
        opts.buckets = $buckets.into();

        ::prometheus::HistogramVec::new(opts, &$label_names)
            .expect("this must be called with valid metrics type and options")
    }};
    ($field_type:ident, $opts:expr, $label_names:expr) => {{
        ::prometheus::$field_type::new($opts.into(), &$label_names)
            .expect("this must be called with valid metrics type and options")
    }};
}

/// Buckets for operations that involve a network round trip, in seconds.
pub fn default_buckets_for_network_calls() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ]
}
