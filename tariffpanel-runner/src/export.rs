//! Result export: JSON bundle, summary and event-study CSVs, Markdown table.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::event_study::EventStudy;
use crate::robustness::{AnalysisResults, SpecResult};

pub const SUMMARY_CSV: &str = "regression_summary.csv";
pub const EVENT_STUDY_CSV: &str = "event_study_coefficients.csv";
pub const RESULTS_JSON: &str = "analysis_results.json";
pub const SUMMARY_MD: &str = "regression_summary.md";

fn num(v: f64, digits: usize) -> String {
    if v.is_finite() {
        format!("{v:.digits$}")
    } else {
        String::new()
    }
}

fn opt(v: Option<f64>, digits: usize) -> String {
    v.map(|x| num(x, digits)).unwrap_or_default()
}

// ─── JSON ───────────────────────────────────────────────────────────

pub fn export_json(results: &AnalysisResults) -> Result<String> {
    serde_json::to_string_pretty(results).context("failed to serialize analysis results to JSON")
}

pub fn import_json(json: &str) -> Result<AnalysisResults> {
    serde_json::from_str(json).context("failed to deserialize analysis results from JSON")
}

// ─── CSV ────────────────────────────────────────────────────────────

/// One row per specification: the tested coefficient, its inference and N.
pub fn export_summary_csv(results: &AnalysisResults) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "spec",
        "description",
        "coefficient",
        "coef",
        "se",
        "p",
        "wild_bootstrap_p",
        "n_obs",
        "n_excluded",
        "n_firms",
        "n_clusters",
        "r2_within",
        "dropped",
        "error",
    ])?;
    for spec in results.all_specs() {
        wtr.write_record(summary_record(spec))?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

fn summary_record(spec: &SpecResult) -> Vec<String> {
    let c = spec.tested_coef();
    let fit = spec.fit.as_ref();
    vec![
        spec.label.clone(),
        spec.description.clone(),
        spec.tested.clone().unwrap_or_default(),
        opt(c.map(|c| c.coef), 6),
        opt(c.map(|c| c.se), 6),
        opt(c.map(|c| c.p), 4),
        opt(fit.and_then(|f| f.bootstrap.as_ref()).map(|b| b.p_value), 4),
        fit.map(|f| f.n_obs.to_string()).unwrap_or_default(),
        fit.map(|f| f.n_excluded.to_string()).unwrap_or_default(),
        fit.map(|f| f.n_firms.to_string()).unwrap_or_default(),
        fit.map(|f| f.n_clusters.to_string()).unwrap_or_default(),
        opt(fit.map(|f| f.r2_within), 4),
        fit.map(|f| f.dropped.join(";")).unwrap_or_default(),
        spec.error.clone().unwrap_or_default(),
    ]
}

/// Columns: year, coef, se, p, ci_low, ci_high.
pub fn export_event_study_csv(event_study: &EventStudy) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["year", "coef", "se", "p", "ci_low", "ci_high"])?;
    for r in &event_study.rows {
        wtr.write_record([
            r.year.to_string(),
            num(r.coef, 6),
            num(r.se, 6),
            opt(r.p, 4),
            num(r.ci_low, 6),
            num(r.ci_high, 6),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Markdown ───────────────────────────────────────────────────────

pub fn generate_markdown(results: &AnalysisResults) -> String {
    let mut md = String::with_capacity(2048);
    md.push_str("# Tariff Exposure and Effective Tax Rates\n\n");

    if let Some(main) = results.main.fit.as_ref() {
        md.push_str("## Main Model\n\n");
        md.push_str(&format!("`{}`\n\n", results.main.formula));
        md.push_str("| Term | Coef | SE | p |\n");
        md.push_str("| --- | ---: | ---: | ---: |\n");
        for c in &main.coefficients {
            md.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                c.name,
                num(c.coef, 3),
                num(c.se, 3),
                num(c.p, 3)
            ));
        }
        md.push('\n');
        if let Some(b) = &main.bootstrap {
            md.push_str(&format!(
                "Wild cluster bootstrap ({} {}, {} clusters, seed {}): p = {}\n\n",
                b.replications,
                if b.enumerated { "sign vectors, full enumeration" } else { "Rademacher draws" },
                b.n_clusters,
                b.seed,
                num(b.p_value, 4)
            ));
        }
    }

    md.push_str("## All Specifications\n\n");
    md.push_str("| Specification | Coef | SE | p | N |\n");
    md.push_str("| --- | ---: | ---: | ---: | ---: |\n");
    for spec in results.all_specs() {
        let name = format!("{}: {}", spec.label, spec.description);
        match (spec.tested_coef(), spec.fit.as_ref()) {
            (Some(c), Some(f)) => md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                name,
                num(c.coef, 2),
                num(c.se, 2),
                num(c.p, 3),
                f.n_obs
            )),
            _ => md.push_str(&format!(
                "| {} | failed: {} | | | |\n",
                name,
                spec.error.as_deref().unwrap_or("not estimated")
            )),
        }
    }
    md.push('\n');

    md.push_str(&format!(
        "## Event Study (reference year {})\n\n",
        results.event_study.reference_year
    ));
    md.push_str("| Year | Coef | 95% CI |\n");
    md.push_str("| --- | ---: | --- |\n");
    for r in &results.event_study.rows {
        md.push_str(&format!(
            "| {} | {} | [{}, {}] |\n",
            r.year,
            num(r.coef, 2),
            num(r.ci_low, 2),
            num(r.ci_high, 2)
        ));
    }
    md
}

// ─── Bundle ─────────────────────────────────────────────────────────

/// Write every result artifact into `output_dir`; returns the written paths.
pub fn save_results(results: &AnalysisResults, output_dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output dir: {}", output_dir.display()))?;

    let files = [
        (SUMMARY_CSV, export_summary_csv(results)?),
        (EVENT_STUDY_CSV, export_event_study_csv(&results.event_study)?),
        (RESULTS_JSON, export_json(results)?),
        (SUMMARY_MD, generate_markdown(results)),
    ];
    let mut written = Vec::with_capacity(files.len());
    for (name, body) in files {
        let path = output_dir.join(name);
        std::fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::estimator::{CoefEstimate, FitResult};
    use crate::event_study::EventStudyRow;
    use crate::variables::VariableSummary;
    use crate::wild_bootstrap::BootstrapOutcome;

    fn fit(coef: f64) -> FitResult {
        FitResult {
            label: "main".into(),
            coefficients: vec![CoefEstimate {
                name: "tariff_x_post".into(),
                coef,
                se: 0.5,
                t: coef / 0.5,
                p: 0.04,
                ci_low: coef - 0.98,
                ci_high: coef + 0.98,
            }],
            n_obs: 120,
            n_excluded: 7,
            n_firms: 30,
            n_clusters: 12,
            r2_within: 0.05,
            dropped: vec![],
            bootstrap: None,
        }
    }

    pub(crate) fn results() -> AnalysisResults {
        let mut main_fit = fit(1.25);
        main_fit.bootstrap = Some(BootstrapOutcome {
            coefficient: "tariff_x_post".into(),
            t_stat: 2.5,
            p_value: 0.031,
            replications: 4096,
            enumerated: true,
            seed: 42,
            n_clusters: 12,
        });
        let spec = |label: &str, fit: Option<FitResult>, error: Option<&str>| SpecResult {
            label: label.into(),
            description: format!("{label} description"),
            formula: "etr_winsorized ~ tariff_x_post | cik + year".into(),
            tested: Some("tariff_x_post".into()),
            fit,
            error: error.map(str::to_string),
        };
        AnalysisResults {
            main: spec("main", Some(main_fit), None),
            event_study: EventStudy {
                reference_year: 2017,
                rows: vec![
                    EventStudyRow {
                        year: 2017,
                        coef: 0.0,
                        se: 0.0,
                        p: None,
                        ci_low: 0.0,
                        ci_high: 0.0,
                    },
                    EventStudyRow {
                        year: 2018,
                        coef: 0.4,
                        se: 0.2,
                        p: Some(0.05),
                        ci_low: 0.008,
                        ci_high: 0.792,
                    },
                ],
                fit: fit(0.0),
            },
            robustness: vec![
                spec("R1", Some(fit(1.1)), None),
                spec("R2", None, Some("R2: 1 cluster(s), at least 2 required")),
            ],
            variables: VariableSummary::default(),
        }
    }

    #[test]
    fn summary_csv_has_one_row_per_spec() {
        let csv = export_summary_csv(&results()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("main,"));
        assert!(lines[1].contains("1.250000"));
        assert!(lines[1].contains("0.0310"));
        assert!(lines[3].contains("at least 2 required"));
    }

    #[test]
    fn event_study_csv_leaves_reference_p_empty() {
        let csv = export_event_study_csv(&results().event_study).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "year,coef,se,p,ci_low,ci_high");
        assert_eq!(lines[1], "2017,0.000000,0.000000,,0.000000,0.000000");
    }

    #[test]
    fn json_round_trip_preserves_bootstrap() {
        let json = export_json(&results()).unwrap();
        let back = import_json(&json).unwrap();
        let b = back.main.fit.unwrap().bootstrap.unwrap();
        assert_eq!(b.replications, 4096);
        assert_eq!(back.robustness.len(), 2);
    }

    #[test]
    fn markdown_marks_failed_specs() {
        let md = generate_markdown(&results());
        assert!(md.contains("## All Specifications"));
        assert!(md.contains("| R2: R2 description | failed:"));
        assert!(md.contains("full enumeration"));
    }

    #[test]
    fn save_results_writes_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let written = save_results(&results(), dir.path()).unwrap();
        assert_eq!(written.len(), 4);
        assert!(written.iter().all(|p| p.exists()));
    }
}
