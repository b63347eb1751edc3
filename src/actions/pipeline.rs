//! The per-press action: record a measurement, then flash the indicator.

use crate::actions::indicator::Indicator;
use crate::actions::store::{MeasurementPoint, TimeSeriesStore};
use crate::config::{ButtonSpec, Config};
use crate::error::{PiMoodError, Result};
use crate::events::ButtonHandler;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Handler registered for every button.
///
/// Upload always comes first and always finishes (or fails) before the LED
/// turns on. A failed upload is logged and the flash still happens.
pub struct ActionPipeline {
    store: Arc<dyn TimeSeriesStore>,
    measurement_name: String,
    indicator: Arc<Indicator>,
    upload_timeout: Option<Duration>,
}

impl ActionPipeline {
    pub fn new(
        store: Arc<dyn TimeSeriesStore>,
        measurement_name: impl Into<String>,
        indicator: Arc<Indicator>,
    ) -> Self {
        Self {
            store,
            measurement_name: measurement_name.into(),
            indicator,
            upload_timeout: None,
        }
    }

    /// Pipeline wired from the `influxdb` section of `config`.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn TimeSeriesStore>,
        indicator: Arc<Indicator>,
    ) -> Self {
        Self::new(store, config.influxdb.measurement_name.clone(), indicator)
            .with_upload_timeout(config.influxdb.upload_timeout())
    }

    /// Bound each upload; `None` waits as long as the store takes.
    pub fn with_upload_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.upload_timeout = timeout;
        self
    }

    /// Submit the point for one press of `button`, stamped with the current UTC time.
    pub async fn upload_measurement(&self, button: &ButtonSpec) -> Result<()> {
        let point = MeasurementPoint::for_button(&self.measurement_name, button, Utc::now());
        debug!("Uploading measurement {:?} to influxdb.", point);

        let write = self.store.write_point(&point);
        match self.upload_timeout {
            Some(limit) => tokio::time::timeout(limit, write).await.map_err(|_| {
                PiMoodError::upload_error(format!("write timed out after {:?}", limit))
            })?,
            None => write.await,
        }
    }

    pub async fn flash_indicator(&self) {
        self.indicator.flash().await
    }
}

#[async_trait]
impl ButtonHandler for ActionPipeline {
    async fn handle(&self, button: &ButtonSpec) {
        if let Err(e) = self.upload_measurement(button).await {
            error!(
                "Failed to record press of button {:?}: {}",
                button.label, e
            );
        }
        self.flash_indicator().await;
    }
}
