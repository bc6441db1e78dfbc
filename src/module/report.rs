//! Dataset Report
//!
//! Static HTML summary of the shared dataset: vehicle counts, pollutant
//! totals and a statistical table of every numeric column. Only rows that
//! already carry a tier1 label are considered.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::module::dataset::{self, DatasetRow};
use crate::module::define::column;
use crate::module::error::Result;

/// count, mean, std, min, 25%, 50%, 75%, max
#[derive(Debug, Clone, PartialEq)]
pub struct Describe {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation, NaN for a single value.
    pub std: f64,
    pub min: f64,
    pub q25: f64,
    pub q50: f64,
    pub q75: f64,
    pub max: f64,
}

impl Describe {
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let std = if n > 1 {
            (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        } else {
            f64::NAN
        };
        Some(Self {
            count: n,
            mean,
            std,
            min: sorted[0],
            q25: quantile(&sorted, 0.25),
            q50: quantile(&sorted, 0.5),
            q75: quantile(&sorted, 0.75),
            max: sorted[n - 1],
        })
    }

    fn cells(&self) -> [f64; 8] {
        [
            self.count as f64,
            self.mean,
            self.std,
            self.min,
            self.q25,
            self.q50,
            self.q75,
            self.max,
        ]
    }
}

// Linear interpolation between closest ranks; `sorted` must not be empty.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Aggregates behind the HTML page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub vehicles: usize,
    pub tier_counts: BTreeMap<String, usize>,
    pub pc_counts: BTreeMap<String, usize>,
    /// tier -> pollutant -> total
    pub tier_emissions: BTreeMap<String, BTreeMap<String, f64>>,
    /// fuel -> pollutant -> total
    pub fuel_emissions: BTreeMap<String, BTreeMap<String, f64>>,
    /// `(column, stats)` in dataset column order.
    pub stats: Vec<(String, Describe)>,
}

impl Summary {
    pub fn from_rows(columns: &[String], rows: &[DatasetRow]) -> Self {
        let rows: Vec<&DatasetRow> = rows.iter().filter(|r| r.is_classified()).collect();
        let mut summary = Summary {
            vehicles: rows.len(),
            ..Default::default()
        };

        let pollutants: Vec<&str> = column::POLLUTANTS
            .iter()
            .copied()
            .filter(|p| columns.iter().any(|c| c == p))
            .collect();
        for row in &rows {
            let tier = row.get(column::TIER1);
            *summary.tier_counts.entry(tier.to_string()).or_insert(0) += 1;
            let pc = row.get(column::PC);
            if !pc.is_empty() {
                *summary.pc_counts.entry(pc.to_string()).or_insert(0) += 1;
            }
            let fuel = row.get(column::FUEL);
            for pollutant in &pollutants {
                let amount = match row.number(pollutant) {
                    Some(amount) => amount,
                    None => continue,
                };
                *summary
                    .tier_emissions
                    .entry(tier.to_string())
                    .or_default()
                    .entry(pollutant.to_string())
                    .or_insert(0.0) += amount;
                if !fuel.is_empty() {
                    *summary
                        .fuel_emissions
                        .entry(fuel.to_string())
                        .or_default()
                        .entry(pollutant.to_string())
                        .or_insert(0.0) += amount;
                }
            }
        }

        for col in columns.iter().filter(|c| *c != column::VEHICLE) {
            let cells: Vec<&str> = rows
                .iter()
                .map(|r| r.get(col).trim())
                .filter(|v| !v.is_empty())
                .collect();
            let values: Vec<f64> = cells.iter().filter_map(|v| v.parse().ok()).collect();
            // Text columns (labels, fuel names) are not described.
            if values.is_empty() || values.len() != cells.len() {
                continue;
            }
            if let Some(stats) = Describe::of(&values) {
                summary.stats.push((col.clone(), stats));
            }
        }
        summary
    }

    /// Render the page. `generated` is printed in the heading.
    pub fn to_html(&self, generated: DateTime<Utc>) -> String {
        let mut html = String::new();
        html.push_str(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
             <title>Vehicle Emission Report</title>\n<style>\n\
             body { font-family: Arial, sans-serif; margin: 10px; color: #333; }\n\
             h1, h2 { color: #2C3E50; text-align: center; }\n\
             table { margin: 0 auto 20px; border-collapse: collapse; font-size: 12px; }\n\
             th, td { border: 1px solid #ddd; padding: 5px; text-align: center; }\n\
             th { background-color: #2C3E50; color: white; }\n\
             </style>\n</head>\n<body>\n",
        );
        let _ = writeln!(html, "<h1>Vehicle Emission Report</h1>");
        let _ = writeln!(
            html,
            "<p style=\"text-align:center\">Generated {} from {} classified vehicles</p>",
            generated.format("%Y-%m-%d %H:%M:%S UTC"),
            self.vehicles
        );

        html.push_str("<h2>Vehicles per tier</h2>\n");
        count_table(&mut html, "Tier", &self.tier_counts);
        html.push_str("<h2>Passenger cars per subtype</h2>\n");
        count_table(&mut html, "Subtype", &self.pc_counts);
        html.push_str("<h2>Emissions per tier</h2>\n");
        total_table(&mut html, "Tier", &self.tier_emissions);
        html.push_str("<h2>Emissions per fuel</h2>\n");
        total_table(&mut html, "Fuel", &self.fuel_emissions);

        html.push_str("<h2>Summary statistics</h2>\n<table>\n<tr><th></th>");
        for (col, _) in &self.stats {
            let _ = write!(html, "<th>{}</th>", escape(col));
        }
        html.push_str("</tr>\n");
        let names = ["count", "mean", "std", "min", "25%", "50%", "75%", "max"];
        for (i, name) in names.iter().enumerate() {
            let _ = write!(html, "<tr><th>{}</th>", name);
            for (_, stats) in &self.stats {
                let _ = write!(html, "<td>{}</td>", number(stats.cells()[i]));
            }
            html.push_str("</tr>\n");
        }
        html.push_str("</table>\n</body>\n</html>\n");
        html
    }
}

fn count_table(html: &mut String, key: &str, counts: &BTreeMap<String, usize>) {
    let _ = writeln!(html, "<table>\n<tr><th>{}</th><th>Vehicles</th></tr>", key);
    for (name, count) in counts {
        let _ = writeln!(html, "<tr><td>{}</td><td>{}</td></tr>", escape(name), count);
    }
    html.push_str("</table>\n");
}

fn total_table(html: &mut String, key: &str, totals: &BTreeMap<String, BTreeMap<String, f64>>) {
    let pollutants: Vec<&str> = column::POLLUTANTS
        .iter()
        .copied()
        .filter(|p| totals.values().any(|t| t.contains_key(*p)))
        .collect();
    let _ = write!(html, "<table>\n<tr><th>{}</th>", key);
    for p in &pollutants {
        let _ = write!(html, "<th>{} (g)</th>", p);
    }
    html.push_str("</tr>\n");
    for (name, by_pollutant) in totals {
        let _ = write!(html, "<tr><td>{}</td>", escape(name));
        for p in &pollutants {
            let _ = write!(
                html,
                "<td>{}</td>",
                number(by_pollutant.get(*p).copied().unwrap_or(0.0))
            );
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</table>\n");
}

fn number(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else {
        format!("{:.4}", v)
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Read the dataset at `data` and write the report to `out`.
///
/// The dataset is only read; a missing file is an error.
pub fn generate(data: &Path, out: &Path) -> Result<Summary> {
    let (columns, rows) = dataset::snapshot(data)?;
    let summary = Summary::from_rows(&columns, &rows);
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(out, summary.to_html(Utc::now()))?;
    log::info!(
        "Report for {} vehicles written to {}",
        summary.vehicles,
        out.display()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::dataset::{
        CaptureRecord, ClassificationFields, DatasetStore, FuelEstimate,
    };
    use chrono::TimeZone;

    fn row(vehicle: &str, cells: &[(&str, &str)]) -> DatasetRow {
        let mut row = DatasetRow::new(vehicle);
        for (col, value) in cells {
            row.set(col, value.to_string());
        }
        row
    }

    fn columns() -> Vec<String> {
        ["vehicle", "classifier-tier1", "classifier-PC", "Fuel", "Fuel_Consumption", "CO"]
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    fn rows() -> Vec<DatasetRow> {
        vec![
            row(
                "vehicle_0.jpg",
                &[
                    ("classifier-tier1", "PC"),
                    ("classifier-PC", "SUV"),
                    ("Fuel", "Gasoline"),
                    ("Fuel_Consumption", "1"),
                    ("CO", "2"),
                ],
            ),
            row(
                "vehicle_1.jpg",
                &[
                    ("classifier-tier1", "PC"),
                    ("classifier-PC", "Sedan"),
                    ("Fuel", "Gasoline"),
                    ("Fuel_Consumption", "2"),
                    ("CO", "4"),
                ],
            ),
            row(
                "vehicle_2.jpg",
                &[
                    ("classifier-tier1", "Truck"),
                    ("Fuel", "Diesel"),
                    ("Fuel_Consumption", "3"),
                    ("CO", "6"),
                ],
            ),
            row("vehicle_3.jpg", &[("classifier-tier1", "Motorcycle")]),
            // not yet classified
            row("vehicle_4.jpg", &[]),
        ]
    }

    #[test]
    fn describe_matches_sample_statistics() {
        let d = Describe::of(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(d.count, 4);
        assert_eq!(d.mean, 2.5);
        assert!((d.std - 1.2909944).abs() < 1e-6);
        assert_eq!((d.min, d.max), (1.0, 4.0));
        assert_eq!((d.q25, d.q50, d.q75), (1.75, 2.5, 3.25));

        let single = Describe::of(&[5.0]).unwrap();
        assert!(single.std.is_nan());
        assert_eq!(single.q75, 5.0);
        assert!(Describe::of(&[]).is_none());
    }

    #[test]
    fn summary_counts_classified_rows_only() {
        let s = Summary::from_rows(&columns(), &rows());
        assert_eq!(s.vehicles, 4);
        assert_eq!(s.tier_counts["PC"], 2);
        assert_eq!(s.tier_counts["Motorcycle"], 1);
        assert_eq!(s.pc_counts.len(), 2);
        assert_eq!(s.tier_emissions["PC"]["CO"], 6.0);
        assert_eq!(s.fuel_emissions["Diesel"]["CO"], 6.0);
        assert!(!s.tier_emissions.contains_key("Motorcycle"));
    }

    #[test]
    fn only_numeric_columns_are_described() {
        let s = Summary::from_rows(&columns(), &rows());
        let described: Vec<&str> = s.stats.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(described, vec!["Fuel_Consumption", "CO"]);
        assert_eq!(s.stats[0].1.count, 3);
        assert_eq!(s.stats[1].1.mean, 4.0);
    }

    #[test]
    fn html_carries_timestamp_and_tables() {
        let s = Summary::from_rows(&columns(), &rows());
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let html = s.to_html(at);
        assert!(html.contains("Generated 2024-05-01 12:00:00 UTC from 4 classified vehicles"));
        assert!(html.contains("<tr><td>Truck</td><td>1</td></tr>"));
        assert!(html.contains("<th>CO (g)</th>"));
        assert!(html.contains("<tr><th>50%</th>"));
    }

    #[test]
    fn generate_from_dataset_file() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data.csv");
        let store = DatasetStore::open(&data).unwrap();
        for name in ["vehicle_0.jpg", "vehicle_1.jpg"] {
            store
                .append(&CaptureRecord {
                    vehicle: name.to_string(),
                })
                .unwrap();
        }
        store
            .upsert_classification(
                "vehicle_0.jpg",
                &ClassificationFields {
                    tier1: "Bus".into(),
                    pc: String::new(),
                    estimate: Some(FuelEstimate {
                        fuel: "Diesel".into(),
                        consumption: 0.5,
                        emissions: vec![("NOx".into(), 10.0)],
                    }),
                },
            )
            .unwrap();

        let out = tmp.path().join("out").join("report.html");
        let s = generate(&data, &out).unwrap();
        assert_eq!(s.vehicles, 1);
        assert_eq!(s.tier_emissions["Bus"]["NOx"], 10.0);
        let html = fs::read_to_string(&out).unwrap();
        assert!(html.contains("<td>Bus</td>"));
        assert!(html.contains("<td>10.0000</td>"));
    }

    #[test]
    fn missing_dataset_is_not_created() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("shared").join("data.csv");
        let out = tmp.path().join("report.html");
        assert!(generate(&data, &out).is_err());
        assert!(!tmp.path().join("shared").exists());
        assert!(!out.exists());
    }
}
