use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};

use starsel::catalog::{CatalogColumns, load_csv};
use starsel::config::SelectionConfig;
use starsel::table::builder::TableBuilderConfig;
use starsel::{
    Completeness, CompletenessTable, MagnitudeBinning, Resolution, SelectionFunction, SurveyInfo,
    build_table,
};

#[derive(Parser)]
#[command(name = "starsel", about = "Catalog completeness tables on the sky")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum SurveyPreset {
    Tgas,
    TgasRave,
}

impl SurveyPreset {
    fn info(self) -> SurveyInfo {
        match self {
            SurveyPreset::Tgas => SurveyInfo::tgas(),
            SurveyPreset::TgasRave => SurveyInfo::tgas_rave(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build a completeness table from a reference and a target catalog.
    Build {
        /// CSV catalog of all known stars.
        #[arg(short, long)]
        reference: PathBuf,

        /// CSV catalog of the stars present in the characterised catalog.
        #[arg(short, long)]
        target: PathBuf,

        /// Output path for the table file.
        #[arg(short, long)]
        output: PathBuf,

        /// JSON config file; flags below override it.
        #[arg(long)]
        config: Option<PathBuf>,

        /// HEALPix nside (8 or 32).
        #[arg(long)]
        nside: Option<u64>,

        /// Magnitude bin edges, comma-separated (e.g. "5,6,7,8,9,10").
        #[arg(long)]
        edges: Option<String>,

        /// Survey labels and sample cut.
        #[arg(long, value_enum)]
        survey: Option<SurveyPreset>,

        /// Print at most this many data-quality warnings.
        #[arg(long, default_value = "20")]
        max_warnings: usize,
    },

    /// Evaluate completeness at one position and magnitude.
    Evaluate {
        #[arg(long)]
        table: PathBuf,

        /// Longitude in degrees.
        #[arg(short, long, allow_hyphen_values = true)]
        l: f64,

        /// Latitude in degrees.
        #[arg(short, long, allow_hyphen_values = true)]
        b: f64,

        #[arg(short, long, allow_hyphen_values = true)]
        mag: f64,

        /// Colour for surveys with a colour cut.
        #[arg(long, allow_hyphen_values = true)]
        colour: Option<f64>,
    },

    /// Evaluate a CSV of points (columns l, b, mag and optionally colour).
    Batch {
        #[arg(long)]
        table: PathBuf,

        #[arg(short, long)]
        input: PathBuf,

        /// Output CSV with a completeness column appended (empty = undefined).
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write the completeness of every cell at one magnitude as JSON.
    SkyMap {
        #[arg(long)]
        table: PathBuf,

        #[arg(short, long, allow_hyphen_values = true)]
        mag: f64,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print mean completeness per magnitude bin.
    Summary {
        #[arg(long)]
        table: PathBuf,
    },
}

fn parse_edges(s: &str) -> Vec<f64> {
    s.split(',')
        .map(|part| {
            part.trim().parse().unwrap_or_else(|_| {
                eprintln!("Invalid magnitude edge: {part}");
                process::exit(1);
            })
        })
        .collect()
}

fn load_selection(path: &Path) -> SelectionFunction {
    let table = CompletenessTable::load(path).unwrap_or_else(|e| {
        eprintln!("Failed to load table {}: {e}", path.display());
        process::exit(1);
    });
    SelectionFunction::new(table).unwrap_or_else(|e| {
        eprintln!("Table {} is unusable: {e}", path.display());
        process::exit(1);
    })
}

fn format_completeness(value: Completeness) -> String {
    match value {
        Completeness::Ratio(r) => format!("{r:.4}"),
        Completeness::Undefined => "undefined".to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_build(
    reference_path: &Path,
    target_path: &Path,
    output_path: &Path,
    config_path: Option<&Path>,
    nside: Option<u64>,
    edges: Option<&str>,
    survey: Option<SurveyPreset>,
    max_warnings: usize,
) {
    let file_config = config_path.map(|p| {
        SelectionConfig::load(p).unwrap_or_else(|e| {
            eprintln!("Failed to load config {}: {e}", p.display());
            process::exit(1);
        })
    });
    let columns = file_config
        .as_ref()
        .map(|c| c.columns.clone())
        .unwrap_or_default();

    let nside = nside.or(file_config.as_ref().map(|c| c.nside)).unwrap_or(8);
    let resolution = Resolution::from_nside(nside).unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });
    let edges = match (edges, &file_config) {
        (Some(s), _) => parse_edges(s),
        (None, Some(c)) => c.magnitude_edges.clone(),
        (None, None) => {
            eprintln!("Magnitude edges are required (--edges or a config file)");
            process::exit(1);
        }
    };
    let binning = MagnitudeBinning::new(edges).unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });
    let survey = survey
        .map(SurveyPreset::info)
        .or(file_config.map(|c| c.survey))
        .unwrap_or_default();
    let config = TableBuilderConfig {
        resolution,
        binning,
        survey,
    };

    let reference = load_catalog(reference_path, &columns);
    let target = load_catalog(target_path, &columns);
    eprintln!(
        "Loaded catalogs: {} reference, {} target stars",
        reference.len(),
        target.len()
    );

    let outcome = build_table(&reference, &target, &config).unwrap_or_else(|e| {
        eprintln!("Failed to build table: {e}");
        process::exit(1);
    });

    eprintln!(
        "Built table: {} cells x {} bins, {} undefined",
        outcome.table.cell_count(),
        outcome.table.bin_count(),
        outcome.table.undefined_count()
    );
    for (label, tally) in [("reference", &outcome.reference), ("target", &outcome.target)] {
        eprintln!(
            "  {label}: counted {}, bad position {}, magnitude out of range {}",
            tally.counted, tally.bad_position, tally.out_of_range
        );
    }
    if !outcome.warnings.is_empty() {
        eprintln!(
            "{} (cell, bin) pairs have more target than reference stars:",
            outcome.warnings.len()
        );
        for w in outcome.warnings.iter().take(max_warnings) {
            eprintln!(
                "  cell {} bin {}: {} target / {} reference",
                w.cell, w.bin, w.target_count, w.reference_count
            );
        }
    }

    outcome.table.save(output_path).unwrap_or_else(|e| {
        eprintln!("Failed to save table {}: {e}", output_path.display());
        process::exit(1);
    });
    eprintln!("Saved table to {}", output_path.display());
}

fn load_catalog(path: &Path, columns: &CatalogColumns) -> Vec<starsel::StarRecord> {
    load_csv(path, columns).unwrap_or_else(|e| {
        eprintln!("Failed to load catalog {}: {e}", path.display());
        process::exit(1);
    })
}

fn cmd_evaluate(table_path: &Path, l: f64, b: f64, mag: f64, colour: Option<f64>) {
    let sf = load_selection(table_path);
    let value = match colour {
        Some(c) => sf.evaluate_with_colour(l, b, mag, c),
        None => sf.evaluate(l, b, mag),
    };
    println!("{}", format_completeness(value));
}

fn cmd_batch(table_path: &Path, input: &Path, output: &Path) {
    let sf = load_selection(table_path);
    let written = evaluate_csv(&sf, input, output).unwrap_or_else(|e| {
        eprintln!("Batch evaluation failed: {e:#}");
        process::exit(1);
    });
    eprintln!("Wrote {written} rows to {}", output.display());
}

fn evaluate_csv(sf: &SelectionFunction, input: &Path, output: &Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(input)
        .with_context(|| format!("Failed to open query CSV: {}", input.display()))?;
    let headers = reader.headers()?.clone();
    let find = |name: &str| headers.iter().position(|h| h.trim() == name);
    let (Some(li), Some(bi), Some(mi)) = (find("l"), find("b"), find("mag")) else {
        bail!("query CSV needs columns l, b, mag");
    };
    let ci = find("colour");

    let mut rows = Vec::new();
    let mut points = Vec::new();
    for (n, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read row {}", n + 1))?;
        let field = |i: usize| -> anyhow::Result<f64> {
            let raw = record.get(i).unwrap_or("").trim();
            raw.parse::<f64>()
                .with_context(|| format!("row {}: cannot parse '{raw}'", n + 1))
        };
        // A blank colour means no colour is known for that row.
        let colour = match ci {
            Some(i) if !record.get(i).unwrap_or("").trim().is_empty() => Some(field(i)?),
            _ => None,
        };
        points.push((field(li)?, field(bi)?, field(mi)?, colour));
        rows.push(record);
    }

    let values: Vec<Completeness> = if ci.is_some() {
        points
            .iter()
            .map(|&(l, b, m, c)| match c {
                Some(c) => sf.evaluate_with_colour(l, b, m, c),
                None => sf.evaluate(l, b, m),
            })
            .collect()
    } else {
        let queries: Vec<_> = points.iter().map(|&(l, b, m, _)| (l, b, m)).collect();
        sf.evaluate_batch(&queries)
    };

    let mut writer = csv::Writer::from_path(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let mut out_headers = headers.clone();
    out_headers.push_field("completeness");
    writer.write_record(&out_headers)?;
    for (mut record, value) in rows.into_iter().zip(values) {
        let cell = value.ratio().map(|r| r.to_string()).unwrap_or_default();
        record.push_field(&cell);
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(points.len())
}

fn cmd_sky_map(table_path: &Path, mag: f64, output: &Path) {
    let sf = load_selection(table_path);
    let Some(map) = sf.map_at_magnitude(mag) else {
        eprintln!("Magnitude must be a number");
        process::exit(1);
    };
    let json = serde_json::to_string_pretty(&map).unwrap_or_else(|e| {
        eprintln!("Failed to encode sky map: {e}");
        process::exit(1);
    });
    std::fs::write(output, json).unwrap_or_else(|e| {
        eprintln!("Failed to write {}: {e}", output.display());
        process::exit(1);
    });
    eprintln!(
        "{}: bin {}, {:.1}% of cells defined, written to {}",
        map.title,
        map.bin,
        100.0 * map.defined_fraction(),
        output.display()
    );
}

fn cmd_summary(table_path: &Path) {
    let sf = load_selection(table_path);
    let table = sf.table();
    let survey = table.survey();
    println!(
        "{} ({} band), {}, {} cells x {} bins",
        survey.name,
        survey.band,
        table.resolution(),
        table.cell_count(),
        table.bin_count()
    );
    if let Some(cut) = survey.colour_cut {
        println!(
            "  colour cut: colour < {} excluded where |lat| < {}",
            cut.min_colour, cut.max_abs_latitude
        );
    }
    for (bin, mean) in sf.mean_completeness_by_bin().into_iter().enumerate() {
        let (lo, hi) = table.binning().bin_range(bin).unwrap_or((f64::NAN, f64::NAN));
        let undefined = table
            .bin_column(bin)
            .map(|col| col.iter().filter(|c| !c.is_defined()).count())
            .unwrap_or(0);
        let mean = mean.map_or_else(|| "undefined".to_string(), |m| format!("{m:.4}"));
        println!("  [{lo:6.2}, {hi:6.2})  mean {mean}  undefined cells {undefined}");
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build {
            reference,
            target,
            output,
            config,
            nside,
            edges,
            survey,
            max_warnings,
        } => cmd_build(
            reference,
            target,
            output,
            config.as_deref(),
            *nside,
            edges.as_deref(),
            *survey,
            *max_warnings,
        ),
        Commands::Evaluate {
            table,
            l,
            b,
            mag,
            colour,
        } => cmd_evaluate(table, *l, *b, *mag, *colour),
        Commands::Batch {
            table,
            input,
            output,
        } => cmd_batch(table, input, output),
        Commands::SkyMap { table, mag, output } => cmd_sky_map(table, *mag, output),
        Commands::Summary { table } => cmd_summary(table),
    }
}
