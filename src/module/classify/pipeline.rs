//! Per-image classification.
//!
//! Tier1 classification, passenger car subclassification, filing the image
//! under `results/<tier>[/<subtype>]`, and the fuel / emission estimate that
//! gets merged into the dataset.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::pool::TaskHandler;
use crate::module::dataset::{ClassificationFields, DatasetStore, FuelEstimate, Upsert};
use crate::module::define::{column, constants, label};
use crate::module::error::{Error, Result};
use crate::module::util::path::file_name;
use crate::module::vision::detector::Classifier;

/// Reference values for one tier.
#[derive(Debug, Clone, PartialEq)]
pub struct TierConstants {
    pub fuel: String,
    /// Base consumption in g/km.
    pub consumption: f64,
    /// `(pollutant, g per kg of fuel)` in dataset column order.
    pub factors: Vec<(String, f64)>,
}

impl TierConstants {
    /// Fuel burnt over the reference distance and the resulting emissions.
    pub fn estimate(&self) -> FuelEstimate {
        let consumption = self.consumption * constants::DISTANCE_KM / 1000.0;
        FuelEstimate {
            fuel: self.fuel.clone(),
            consumption,
            emissions: self
                .factors
                .iter()
                .map(|(pollutant, factor)| (pollutant.clone(), factor * consumption))
                .collect(),
        }
    }
}

/// Constants keyed by tier label.
#[derive(Debug, Clone, Default)]
pub struct ConstantsTable {
    tiers: HashMap<String, TierConstants>,
}

impl ConstantsTable {
    /// Load a `;`-delimited constants file.
    pub fn load(path: &Path) -> Result<Self> {
        let table = Self::from_reader(fs::File::open(path)?)?;
        log::info!(
            "Loaded constants for {} tiers from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader.headers()?.clone();
        let position = |name: &str| headers.iter().position(|h| h == name);
        let key = position(constants::KEY)
            .ok_or_else(|| Error::Config(format!("constants table lacks {}", constants::KEY)))?;
        let fuel = position(constants::FUEL);
        let consumption = position(constants::CONSUMPTION).ok_or_else(|| {
            Error::Config(format!("constants table lacks {}", constants::CONSUMPTION))
        })?;
        let factor_cols: Vec<(&str, usize)> = column::POLLUTANTS
            .iter()
            .filter_map(|p| position(&constants::factor_column(p)).map(|i| (*p, i)))
            .collect();

        let mut tiers = HashMap::new();
        for record in reader.records() {
            let record = record?;
            let tier = record.get(key).unwrap_or("").to_string();
            if tier.is_empty() {
                continue;
            }
            let base = match record.get(consumption).and_then(parse_number) {
                Some(base) => base,
                None => {
                    log::warn!("Tier {} has no usable consumption, skipped", tier);
                    continue;
                }
            };
            let factors = factor_cols
                .iter()
                .filter_map(|(p, i)| {
                    record
                        .get(*i)
                        .and_then(parse_number)
                        .map(|f| (p.to_string(), f))
                })
                .collect();
            tiers.insert(
                tier,
                TierConstants {
                    fuel: fuel
                        .and_then(|i| record.get(i))
                        .unwrap_or("")
                        .to_string(),
                    consumption: base,
                    factors,
                },
            );
        }
        Ok(Self { tiers })
    }

    pub fn get(&self, tier: &str) -> Option<&TierConstants> {
        self.tiers.get(tier)
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

// Accepts both `1.5` and `1,5`.
fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse()
        .ok()
        .or_else(|| s.replace(',', ".").parse().ok())
}

/// What happened to one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub vehicle: String,
    pub fields: ClassificationFields,
    pub filed_at: PathBuf,
    pub upsert: Upsert,
}

/// Classifiers, constants and the shared dataset.
pub struct ClassificationPipeline {
    tier1: Box<dyn Classifier>,
    pc: Box<dyn Classifier>,
    constants: ConstantsTable,
    store: Arc<DatasetStore>,
    results_dir: PathBuf,
}

impl ClassificationPipeline {
    pub fn new(
        tier1: Box<dyn Classifier>,
        pc: Box<dyn Classifier>,
        constants: ConstantsTable,
        store: Arc<DatasetStore>,
        results_dir: &Path,
    ) -> Self {
        Self {
            tier1,
            pc,
            constants,
            store,
            results_dir: results_dir.to_path_buf(),
        }
    }

    /// Classify, file and record one image.
    pub fn process(&self, path: &Path) -> Result<Outcome> {
        let vehicle = file_name(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", path.display()),
            )
        })?;
        // Gone already, e.g. picked up twice across restarts.
        fs::metadata(path)?;

        let tier1 = self
            .tier1
            .classify(path)?
            .unwrap_or_else(|| label::NO_DETECTION.to_string());
        let tier_dir = self.results_dir.join(dir_name(&tier1));
        let mut filed_at = move_file(path, &tier_dir.join(&vehicle))?;

        let mut pc = String::new();
        if tier1 == label::PASSENGER_CAR {
            pc = self
                .pc
                .classify(&filed_at)?
                .unwrap_or_else(|| label::NO_SUBTYPE.to_string());
            let stem = Path::new(&vehicle)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| vehicle.clone());
            let ext = Path::new(&vehicle)
                .extension()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| crate::module::define::path::CAPTURE_EXT.to_string());
            let target = tier_dir
                .join(dir_name(&pc))
                .join(format!("{}_{}.{}", stem, dir_name(&pc), ext));
            filed_at = move_file(&filed_at, &target)?;
        }

        let estimate = self.constants.get(&tier1).map(TierConstants::estimate);
        if estimate.is_none() {
            log::debug!("No constants for tier {}, estimate skipped", tier1);
        }
        let fields = ClassificationFields {
            tier1,
            pc,
            estimate,
        };
        let upsert = self.store.upsert_classification(&vehicle, &fields)?;
        log::info!(
            "{} classified as {}{} -> {}",
            vehicle,
            fields.tier1,
            if fields.pc.is_empty() {
                String::new()
            } else {
                format!("/{}", fields.pc)
            },
            filed_at.display()
        );
        Ok(Outcome {
            vehicle,
            fields,
            filed_at,
            upsert,
        })
    }
}

impl TaskHandler for ClassificationPipeline {
    fn handle(&self, path: &Path) -> Result<()> {
        self.process(path).map(|_| ())
    }
}

// Labels become directory names; keep them to one path component.
fn dir_name(label: &str) -> String {
    label
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

/// Move `from` to `to`, creating parent directories. Falls back to copy for cross-device moves.
pub fn move_file(from: &Path, to: &Path) -> Result<PathBuf> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(from, to).is_err() {
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(to.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::dataset::CaptureRecord;

    /// Answers by file name prefix, `None` for anything unknown.
    struct ByName(Vec<(&'static str, &'static str)>);

    impl Classifier for ByName {
        fn classify(&self, path: &Path) -> Result<Option<String>> {
            assert!(path.is_file(), "classifier called on missing {}", path.display());
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            Ok(self
                .0
                .iter()
                .find(|(prefix, _)| name.starts_with(prefix))
                .map(|(_, label)| label.to_string()))
        }
    }

    const TABLE: &str = "Type;Fuel;CONSUMO (g/km);CO (g/kg fuel);NOx (g/kg fuel);PM (g/kg fuel)\n\
                         PC;Gasoline;10000;2;0,5;\n\
                         Truck;Diesel;250;8;30;1.5\n";

    struct Fixture {
        _tmp: tempfile::TempDir,
        watch: PathBuf,
        results: PathBuf,
        store: Arc<DatasetStore>,
        pipeline: ClassificationPipeline,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let watch = tmp.path().join("images");
        let results = tmp.path().join("results");
        fs::create_dir_all(&watch).unwrap();
        let store = Arc::new(DatasetStore::open(&tmp.path().join("data.csv")).unwrap());
        let pipeline = ClassificationPipeline::new(
            Box::new(ByName(vec![
                ("car", "PC"),
                ("truck", "Truck"),
                ("moto", "Motorcycle"),
            ])),
            Box::new(ByName(vec![("car_suv", "SUV")])),
            ConstantsTable::from_reader(TABLE.as_bytes()).unwrap(),
            Arc::clone(&store),
            &results,
        );
        Fixture {
            _tmp: tmp,
            watch,
            results,
            store,
            pipeline,
        }
    }

    fn captured(f: &Fixture, name: &str) -> PathBuf {
        let path = f.watch.join(name);
        fs::write(&path, b"jpeg").unwrap();
        f.store
            .append(&CaptureRecord {
                vehicle: name.to_string(),
            })
            .unwrap();
        path
    }

    #[test]
    fn constants_table_parses() {
        let table = ConstantsTable::from_reader(TABLE.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        let pc = table.get("PC").unwrap();
        assert_eq!(pc.fuel, "Gasoline");
        assert_eq!(pc.consumption, 10000.0);
        // empty PM cell is left out, decimal comma accepted
        assert_eq!(
            pc.factors,
            vec![("CO".to_string(), 2.0), ("NOx".to_string(), 0.5)]
        );
        assert_eq!(table.get("Truck").unwrap().factors.len(), 3);
        assert!(table.get("Bus").is_none());
    }

    #[test]
    fn estimate_arithmetic() {
        let est = TierConstants {
            fuel: "Gasoline".into(),
            consumption: 10000.0,
            factors: vec![("CO".into(), 2.0), ("NOx".into(), 0.5)],
        }
        .estimate();
        assert_eq!(est.consumption, 10.0);
        assert_eq!(
            est.emissions,
            vec![("CO".to_string(), 20.0), ("NOx".to_string(), 5.0)]
        );
    }

    #[test]
    fn passenger_car_is_subclassified_and_filed() {
        let f = fixture();
        let src = captured(&f, "car_suv_0.jpg");
        let out = f.pipeline.process(&src).unwrap();

        assert_eq!(out.upsert, Upsert::Updated);
        assert_eq!(out.fields.tier1, "PC");
        assert_eq!(out.fields.pc, "SUV");
        assert_eq!(
            out.filed_at,
            f.results.join("PC").join("SUV").join("car_suv_0_SUV.jpg")
        );
        assert!(out.filed_at.is_file());
        assert!(!src.exists());
        assert!(!f.results.join("PC").join("car_suv_0.jpg").exists());

        let row = f.store.get("car_suv_0.jpg").unwrap();
        assert_eq!(row.get("classifier-PC"), "SUV");
        assert_eq!(row.get("Fuel"), "Gasoline");
        assert_eq!(row.number("Fuel_Consumption"), Some(10.0));
        assert_eq!(row.number("CO"), Some(20.0));
        assert_eq!(row.number("NOx"), Some(5.0));
    }

    #[test]
    fn unknown_subtype_uses_sentinel() {
        let f = fixture();
        let src = captured(&f, "car_1.jpg");
        let out = f.pipeline.process(&src).unwrap();
        assert_eq!(out.fields.pc, "No PC subclass");
        assert_eq!(
            out.filed_at,
            f.results
                .join("PC")
                .join("No PC subclass")
                .join("car_1_No PC subclass.jpg")
        );
    }

    #[test]
    fn other_tiers_leave_subtype_empty() {
        let f = fixture();
        let src = captured(&f, "truck_2.jpg");
        let out = f.pipeline.process(&src).unwrap();
        assert_eq!(out.fields.pc, "");
        assert_eq!(out.filed_at, f.results.join("Truck").join("truck_2.jpg"));
        let row = f.store.get("truck_2.jpg").unwrap();
        assert_eq!(row.get("classifier-tier1"), "Truck");
        assert_eq!(row.number("Fuel_Consumption"), Some(0.25));
        assert_eq!(row.number("NOx"), Some(7.5));
    }

    #[test]
    fn tier_without_constants_skips_numbers() {
        let f = fixture();
        let src = captured(&f, "moto_3.jpg");
        let out = f.pipeline.process(&src).unwrap();
        assert!(out.fields.estimate.is_none());
        assert_eq!(
            f.store.columns(),
            vec!["vehicle", "classifier-tier1", "classifier-PC"]
        );
        assert_eq!(f.store.get("moto_3.jpg").unwrap().get("Fuel"), "");
    }

    #[test]
    fn nothing_detected_uses_sentinel() {
        let f = fixture();
        let src = captured(&f, "blur_4.jpg");
        let out = f.pipeline.process(&src).unwrap();
        assert_eq!(out.fields.tier1, "No detection");
        assert!(f.results.join("No detection").join("blur_4.jpg").is_file());
    }

    #[test]
    fn image_without_row_is_filed_but_not_recorded() {
        let f = fixture();
        let src = f.watch.join("truck_9.jpg");
        fs::write(&src, b"jpeg").unwrap();
        let before = fs::read(f.store.path()).unwrap();

        let out = f.pipeline.process(&src).unwrap();
        assert_eq!(out.upsert, Upsert::Missing);
        assert_eq!(fs::read(f.store.path()).unwrap(), before);
        assert!(f.store.get("truck_9.jpg").is_none());
    }

    #[test]
    fn missing_image_is_an_error() {
        let f = fixture();
        assert!(f.pipeline.handle(&f.watch.join("gone.jpg")).is_err());
    }
}
