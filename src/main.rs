// wifi-card: Generate WiFi QR codes with a centre logo and patch PDF card templates

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use clap::Parser;
use ::image::DynamicImage;
use lopdf::Document;
use thiserror::Error;

mod metrics;
mod pdf;
mod qr;

use pdf::{PatchError, TemplateConfig};
use qr::{QrStyle, Security, WifiNetwork};

// ============================================================================
// Constants
// ============================================================================

/// File name of the QR bitmap inside the run's output directory.
const QR_FILENAME: &str = "wifi_qr.png";

/// File name of the patched card inside the run's output directory.
const CARD_FILENAME: &str = "wifi_card.pdf";

/// Timestamp format for per-run output directories.
const RUN_DIR_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to generate QR code: {0}")]
    QrError(String),
    #[error("Failed to load logo: {0}")]
    LogoError(String),
    #[error("Invalid template config: {0}")]
    ConfigError(String),
    #[error("{0}")]
    InputError(String),
    #[error("Failed to patch template: {0}")]
    TemplateError(#[from] PatchError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Generate a WiFi QR code with a centre logo, optionally patched into a PDF card template"
)]
struct Args {
    /// Network name (prompted for when omitted)
    #[arg(short, long, env = "WIFI_SSID")]
    ssid: Option<String>,

    /// Network password (prompted for when omitted)
    #[arg(short, long, env = "WIFI_PASSWORD")]
    password: Option<String>,

    /// Authentication type encoded in the QR payload
    #[arg(long, value_enum, default_value_t = Security::Wpa)]
    security: Security,

    /// PDF card template to patch with the new credentials
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// Template layout overrides (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logo image (file path or URL); defaults to the sole .png/.ico in the logo directory
    #[arg(long)]
    logo: Option<String>,

    /// Directory searched for a logo when --logo is not given
    #[arg(long, default_value = "logo")]
    logo_dir: PathBuf,

    /// Root directory for timestamped output folders
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Pixels per QR module
    #[arg(long, default_value_t = 10)]
    qr_scale: u32,

    /// Fraction of the QR width covered by the logo
    #[arg(long, default_value_t = 0.2)]
    logo_coverage: f32,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    let args = Args::parse();

    let config = load_template_config(&args.config)?;

    let ssid = match args.ssid {
        Some(s) if !s.trim().is_empty() => s,
        _ => prompt("WiFi SSID")?,
    };
    if ssid.trim().is_empty() {
        return Err(AppError::InputError("SSID must not be empty".to_string()));
    }
    let password = match args.password {
        Some(p) => p,
        None if args.security == Security::Nopass => String::new(),
        None => prompt("WiFi password")?,
    };

    let logo = match &args.logo {
        Some(source) => load_logo(source)?,
        None => {
            let path = find_logo(&args.logo_dir)?;
            load_logo(&path.to_string_lossy())?
        }
    };

    let network = WifiNetwork {
        ssid: ssid.clone(),
        password: password.clone(),
        security: args.security,
    };
    let style = QrStyle {
        module_px: args.qr_scale,
        logo_coverage: args.logo_coverage,
    };
    let rendered = qr::encode(&network, Some(&logo), &style)?;

    let out_dir = create_run_dir(&args.output)?;
    let qr_path = out_dir.join(QR_FILENAME);
    rendered
        .image
        .save(&qr_path)
        .map_err(|e| AppError::QrError(e.to_string()))?;
    println!("✓ QR code generated: {}", qr_path.display());

    if let Some(template) = &args.template {
        let mut doc = Document::load(template).map_err(PatchError::from)?;
        let plan = pdf::patch_template(&mut doc, &config, &ssid, &password, &rendered)?;
        let card_path = out_dir.join(CARD_FILENAME);
        doc.save(&card_path)?;
        println!("✓ Card patched: {}", card_path.display());
        if plan.ssid_value.is_none() && plan.password_value.is_none() {
            println!("  (template carried no stale credentials; rows located by their labels)");
        }
    }

    println!("  Network: {}", ssid);
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn prompt(label: &str) -> Result<String, AppError> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn load_template_config(path: &Option<PathBuf>) -> Result<TemplateConfig, AppError> {
    match path {
        Some(p) => {
            let content = fs::read_to_string(p)
                .map_err(|e| AppError::ConfigError(format!("{}: {}", p.display(), e)))?;
            serde_json::from_str(&content)
                .map_err(|e| AppError::ConfigError(format!("invalid JSON: {}", e)))
        }
        None => Ok(TemplateConfig::default()),
    }
}

/// Find the single .png/.ico logo in `dir`.
fn find_logo(dir: &Path) -> Result<PathBuf, AppError> {
    if !dir.exists() {
        return Err(AppError::LogoError(format!(
            "logo directory not found: {}",
            dir.display()
        )));
    }

    let mut logos = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if matches!(ext.as_deref(), Some("png") | Some("ico")) {
            logos.push(path);
        }
    }

    match logos.len() {
        0 => Err(AppError::LogoError(format!(
            "no logo (.png or .ico) found in {}",
            dir.display()
        ))),
        1 => Ok(logos.remove(0)),
        _ => Err(AppError::LogoError(format!(
            "more than one logo in {}; keep a single .png or .ico file",
            dir.display()
        ))),
    }
}

/// Load a logo from a file path or an HTTP(S) URL.
fn load_logo(source: &str) -> Result<DynamicImage, AppError> {
    let image_bytes = if source.starts_with("http://") || source.starts_with("https://") {
        let response = ureq::get(source)
            .call()
            .map_err(|e| AppError::LogoError(format!("failed to fetch URL: {}", e)))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| AppError::LogoError(format!("failed to read response: {}", e)))?;
        bytes
    } else {
        fs::read(source).map_err(|e| AppError::LogoError(format!("{}: {}", source, e)))?
    };

    ::image::load_from_memory(&image_bytes)
        .map_err(|e| AppError::LogoError(format!("failed to decode image: {}", e)))
}

/// Create this run's timestamped output directory under `root`.
fn create_run_dir(root: &Path) -> Result<PathBuf, AppError> {
    let stamp = Local::now().format(RUN_DIR_FORMAT).to_string();
    let dir = root.join(stamp);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}
