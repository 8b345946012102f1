use crate::table::*;
use crate::*;
use rand::Rng;

/// Milliseconds between consecutive readings of one device.
const READING_INTERVAL: i64 = 1_000;
/// First reading of the synthetic fleet (2024-01-01T00:00:00Z).
const EPOCH_START: i64 = 1_704_067_200_000;

/// Synthetic sensor fleet standing in for the raw ingest.
///
/// Rows are emitted device by device, so they are deliberately not in
/// timestamp order. Sensor values sit mostly in [0, 1] with occasional
/// excursions above it, and `defect` fires when a device runs hot
/// and fast at the same time.
pub struct Fleet {
    pub devices: usize,
    pub readings: usize,
}

impl Fleet {
    pub fn rows(&self) -> usize {
        self.devices * self.readings
    }

    pub fn generate(&self, rng: &mut impl Rng) -> anyhow::Result<Frame> {
        let n = self.rows();
        let mut device = Vec::with_capacity(n);
        let mut trip = Vec::with_capacity(n);
        let mut timestamp = Vec::with_capacity(n);
        let mut factory = Vec::with_capacity(n);
        let mut model = Vec::with_capacity(n);
        let mut sensors = SENSOR_COLUMNS.map(|_| Vec::with_capacity(n));
        let mut defect = Vec::with_capacity(n);
        for d in 0..self.devices {
            let offset = rng.random_range(0..READING_INTERVAL);
            let wear = rng.random::<f64>() * 0.2;
            for r in 0..self.readings {
                device.push(format!("device_{:04}", d));
                trip.push(format!("trip_{:04}_{:03}", d, r / 100));
                timestamp.push(EPOCH_START + offset + r as i64 * READING_INTERVAL);
                factory.push(format!("factory_{}", d % 4));
                model.push(format!("model_{}", d % 3));
                let reading = SENSOR_COLUMNS.map(|_| (rng.random::<f64>() * 1.1 + wear).max(0.));
                let hot = reading[3] > 0.85;
                let fast = reading[1] > 0.75;
                let noise = rng.random::<f64>() < 0.02;
                defect.push(((hot && fast) ^ noise) as i64);
                sensors
                    .iter_mut()
                    .zip(reading)
                    .for_each(|(column, value)| column.push(value));
            }
        }
        SENSOR_COLUMNS.iter().zip(sensors).try_fold(
            Frame::default()
                .with("device_id", Column::Text(device))?
                .with("trip_id", Column::Text(trip))?
                .with(TIMESTAMP_COLUMN, Column::Int(timestamp))?
                .with("factory_id", Column::Text(factory))?
                .with("model_id", Column::Text(model))?,
            |frame, (name, values)| frame.with(name, Column::Float(values)),
        )?
        .with(TARGET_COLUMN, Column::Int(defect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn shape() {
        let ref mut rng = SmallRng::seed_from_u64(7);
        let fleet = Fleet {
            devices: 3,
            readings: 50,
        };
        let frame = fleet.generate(rng).unwrap();
        assert_eq!(frame.rows(), 150);
        assert!(frame.require(CATEGORICAL_COLUMNS).is_ok());
        assert!(frame.require(SENSOR_COLUMNS).is_ok());
        let labels = frame.column(TARGET_COLUMN).unwrap().ints().unwrap();
        assert!(labels.iter().all(|&l| l == 0 || l == 1));
    }

    #[test]
    fn unordered() {
        let ref mut rng = SmallRng::seed_from_u64(11);
        let fleet = Fleet {
            devices: 4,
            readings: 10,
        };
        let frame = fleet.generate(rng).unwrap();
        let ts = frame.column(TIMESTAMP_COLUMN).unwrap().ints().unwrap();
        assert!(ts.windows(2).any(|w| w[1] < w[0]));
    }
}
