//! Callback surface for sensor lifecycle events. `sensor_added` fires exactly
//! once per sensor id, strictly before that id's first `sensor_updated`.

use async_trait::async_trait;

use crate::sensor::codec::Sensor;

#[async_trait]
pub trait SensorHandler: Send + Sync {
    async fn sensor_added(&self, sensor: &Sensor);
    async fn sensor_updated(&self, sensor: &Sensor);
}

/// Wraps a single closure as a handler, with a no-op `sensor_added`. Covers
/// the common case where only updates matter.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> SensorHandler for FnHandler<F>
where
    F: Fn(&Sensor) + Send + Sync,
{
    async fn sensor_added(&self, _sensor: &Sensor) {}

    async fn sensor_updated(&self, sensor: &Sensor) {
        (self.0)(sensor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn fn_handler_ignores_added_and_calls_closure_on_updated() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let handler = FnHandler(move |_: &Sensor| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        let sensor = Sensor::new([0x02, 0, 0, 0, 0, 0]);
        handler.sensor_added(&sensor).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        handler.sensor_updated(&sensor).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
