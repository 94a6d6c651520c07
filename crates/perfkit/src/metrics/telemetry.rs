// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Histogram, Meter, MeterProvider},
};

const METER_NAME: &str = "perfkit";
const VERSION: &str = "v0.1.0";
const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.47.0";

pub(crate) const OPERATION_DURATION_NAME: &str = "perfkit.operation.duration";
pub(crate) const OPERATION_NAME: &str = "operation.name";

pub(crate) fn create_meter(meter_provider: &dyn MeterProvider) -> Meter {
    meter_provider.meter_with_scope(
        InstrumentationScope::builder(METER_NAME)
            .with_version(VERSION)
            .with_schema_url(SCHEMA_URL)
            .build(),
    )
}

pub(crate) fn create_operation_duration_histogram(meter: &Meter) -> Histogram<f64> {
    meter
        .f64_histogram(OPERATION_DURATION_NAME)
        .with_description("Duration of timed operations")
        .with_unit("s")
        .build()
}

pub(crate) fn operation_attributes(name: &str) -> [KeyValue; 1] {
    [KeyValue::new(OPERATION_NAME, name.to_owned())]
}
