use chrono::{Local, NaiveDate};
use clap::Args;
use doc_triage::error::AppError;
use doc_triage::workflows::triage::report;
use doc_triage::workflows::triage::{ClassificationEngine, ClassificationView, Evidence};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct ClassifyArgs {
    /// JSON file keyed by document type
    #[arg(long)]
    pub(crate) evidence: PathBuf,
    /// Evaluation date for document ages (defaults to today)
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

pub(crate) fn run_classify(args: ClassifyArgs) -> Result<(), AppError> {
    let view = classify_file(&args)?;
    match serde_json::to_string_pretty(&view) {
        Ok(json) => println!("{json}"),
        Err(err) => println!("Classification output unavailable: {err}"),
    }
    Ok(())
}

pub(crate) fn classify_file(args: &ClassifyArgs) -> Result<ClassificationView, AppError> {
    let raw = std::fs::read_to_string(&args.evidence)?;
    let evidence = Evidence::from_json_str(&raw)?;
    let today = args.today.unwrap_or_else(|| Local::now().date_naive());

    let result = ClassificationEngine::default().classify_on(&evidence, today);
    Ok(ClassificationView {
        recommendations: report::recommendations(&result),
        summary: report::summary(&result),
        result,
    })
}
