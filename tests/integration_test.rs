use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream, StringFormat};

fn cargo_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_wifi-card"))
}

/// Per-test scratch directory under tests/output.
fn test_dir(name: &str) -> PathBuf {
    let dir = Path::new("tests/output").join(name);
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("Failed to create test directory");
    dir
}

/// Write a small opaque logo for the QR overlay.
fn write_logo(dir: &Path) -> PathBuf {
    let path = dir.join("logo.png");
    let logo = image::RgbImage::from_pixel(16, 16, image::Rgb([200, 30, 40]));
    logo.save(&path).expect("Failed to write logo");
    path
}

/// Build a card template in the sample layout and save it to `path`.
/// Each row is (text, x, y) in 11pt Helvetica.
fn write_template(path: &Path, rows: &[(&str, f64, f64)]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut operations = Vec::new();
    for &(text, x, y) in rows {
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new(
            "Tf",
            vec![Object::Name(b"F1".to_vec()), Object::Real(11.0)],
        ));
        operations.push(Operation::new(
            "Tm",
            vec![
                Object::Real(1.0),
                Object::Real(0.0),
                Object::Real(0.0),
                Object::Real(1.0),
                Object::Real(x as f32),
                Object::Real(y as f32),
            ],
        ));
        operations.push(Operation::new(
            "Tj",
            vec![Object::String(text.bytes().collect(), StringFormat::Literal)],
        ));
        operations.push(Operation::new("ET", vec![]));
    }
    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(595.28),
            Object::Real(841.89),
        ],
        "Resources" => dictionary! {
            "Font" => dictionary! {
                "F1" => dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                },
            },
        },
        "Contents" => content_id,
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => 1,
            "Kids" => vec![Object::Reference(page_id)],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));
    doc.save(path).expect("Failed to save template");
}

fn sample_rows() -> Vec<(&'static str, f64, f64)> {
    vec![
        ("Rete Wi-Fi", 100.0, 520.0),
        ("Edoras-Guest", 310.0, 520.0),
        ("Password", 100.0, 480.0),
        ("Edoras-2346", 310.0, 480.0),
        ("Inquadra il QR code", 230.0, 420.0),
    ]
}

/// The single timestamped run directory created under `root`.
fn run_dir(root: &Path) -> PathBuf {
    let mut dirs: Vec<PathBuf> = fs::read_dir(root)
        .expect("Failed to read output root")
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    assert_eq!(dirs.len(), 1, "expected exactly one run directory");
    dirs.remove(0)
}

fn string_bytes(obj: &Object) -> Option<&[u8]> {
    match obj {
        Object::String(bytes, _) => Some(bytes),
        _ => None,
    }
}

/// All Tj/TJ literals on the first page, decoded as Latin-1.
fn extract_text(path: &Path) -> Vec<String> {
    let doc = Document::load(path).expect("Failed to load output PDF");
    let (_, page_id) = doc.get_pages().into_iter().next().expect("no pages");
    let data = doc.get_page_content(page_id).expect("no content");
    let content = Content::decode(&data).expect("undecodable content");

    let mut texts = Vec::new();
    for op in &content.operations {
        match op.operator.as_str() {
            "Tj" | "'" => {
                if let Some(bytes) = op.operands.first().and_then(string_bytes) {
                    texts.push(bytes.iter().map(|&b| b as char).collect());
                }
            }
            "TJ" => {
                if let Some(Ok(elements)) = op.operands.first().map(Object::as_array) {
                    let mut text = String::new();
                    for element in elements {
                        if let Some(bytes) = string_bytes(element) {
                            text.extend(bytes.iter().map(|&b| b as char));
                        }
                    }
                    texts.push(text);
                }
            }
            _ => {}
        }
    }
    texts
}

fn count_images(path: &Path) -> usize {
    let doc = Document::load(path).expect("Failed to load output PDF");
    let (_, page_id) = doc.get_pages().into_iter().next().expect("no pages");
    let data = doc.get_page_content(page_id).expect("no content");
    let content = Content::decode(&data).expect("undecodable content");
    content
        .operations
        .iter()
        .filter(|op| op.operator == "Do")
        .count()
}

#[test]
fn test_qr_only_run() {
    let dir = test_dir("qr-only");
    let logo = write_logo(&dir);
    let out_root = dir.join("out");

    let output = cargo_bin()
        .args([
            "--ssid", "Edoras",
            "--password", "Test#1234",
            "--logo", logo.to_str().unwrap(),
            "--output", out_root.to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success(), "Command failed: {:?}", output);

    let qr_path = run_dir(&out_root).join("wifi_qr.png");
    assert!(qr_path.exists(), "QR image was not created");
    let img = image::open(&qr_path).expect("Failed to read QR image");
    assert_eq!(img.width(), img.height());
    assert!(img.width() > 100, "QR image is implausibly small");
}

#[test]
fn test_patch_template_end_to_end() {
    let dir = test_dir("patch-card");
    let logo = write_logo(&dir);
    let template = dir.join("template.pdf");
    write_template(&template, &sample_rows());
    let out_root = dir.join("out");

    let output = cargo_bin()
        .args([
            "--ssid", "Rohan",
            "--password", "Test#1234",
            "--logo", logo.to_str().unwrap(),
            "--template", template.to_str().unwrap(),
            "--output", out_root.to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success(), "Command failed: {:?}", output);

    let run = run_dir(&out_root);
    assert!(run.join("wifi_qr.png").exists());
    let card = run.join("wifi_card.pdf");
    assert!(card.exists(), "patched card was not created");

    let texts = extract_text(&card);
    assert!(texts.iter().all(|t| !t.contains("Edoras-2346")));
    assert!(texts.iter().all(|t| !t.contains("Edoras-Guest")));
    assert!(texts.iter().any(|t| t == "Rohan"));
    assert!(texts.iter().any(|t| t == "Test#1234"));
    // Labels survive.
    assert!(texts.iter().any(|t| t == "Password"));
    assert_eq!(count_images(&card), 1, "expected exactly the QR image");
}

#[test]
fn test_credentials_from_environment() {
    let dir = test_dir("env-credentials");
    let logo = write_logo(&dir);
    let out_root = dir.join("out");

    let output = cargo_bin()
        .env("WIFI_SSID", "Rohan")
        .env("WIFI_PASSWORD", "from-env")
        .args([
            "--logo", logo.to_str().unwrap(),
            "--output", out_root.to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success(), "Command failed: {:?}", output);
    assert!(run_dir(&out_root).join("wifi_qr.png").exists());
}

#[test]
fn test_missing_anchor_aborts_without_card() {
    let dir = test_dir("missing-anchor");
    let logo = write_logo(&dir);
    let template = dir.join("template.pdf");
    // Template without the Password anchor.
    write_template(
        &template,
        &[
            ("Rete Wi-Fi", 100.0, 520.0),
            ("Inquadra il QR code", 230.0, 420.0),
        ],
    );
    let out_root = dir.join("out");

    let output = cargo_bin()
        .args([
            "--ssid", "Rohan",
            "--password", "pw",
            "--logo", logo.to_str().unwrap(),
            "--template", template.to_str().unwrap(),
            "--output", out_root.to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Command should have failed");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Password"),
        "error should name the missing anchor: {stderr}"
    );
    assert!(
        !run_dir(&out_root).join("wifi_card.pdf").exists(),
        "no card may be written when the template does not match"
    );
}

#[test]
fn test_missing_logo_fails() {
    let dir = test_dir("missing-logo");
    let out_root = dir.join("out");

    let output = cargo_bin()
        .args([
            "--ssid", "Edoras",
            "--password", "pw",
            "--logo-dir", dir.join("nope").to_str().unwrap(),
            "--output", out_root.to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Command should have failed");
}

#[test]
fn test_missing_ssid_fails_without_tty_input() {
    let dir = test_dir("missing-ssid");
    let logo = write_logo(&dir);

    let output = cargo_bin()
        .env_remove("WIFI_SSID")
        .env_remove("WIFI_PASSWORD")
        .args([
            "--logo", logo.to_str().unwrap(),
            "--output", dir.join("out").to_str().unwrap(),
        ])
        .stdin(std::process::Stdio::null())
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Command should have failed");
}

#[test]
fn test_config_file_relabels_template() {
    let dir = test_dir("custom-config");
    let logo = write_logo(&dir);
    let template = dir.join("template.pdf");
    // Same layout, German labels, no stale values printed.
    write_template(
        &template,
        &[
            ("Netzwerk", 100.0, 520.0),
            ("Kennwort", 100.0, 480.0),
            ("QR-Code scannen", 230.0, 420.0),
        ],
    );
    let config_path = dir.join("template.json");
    fs::write(
        &config_path,
        r#"{
            "ssid_label": "Netzwerk",
            "password_label": "Kennwort",
            "qr_label": "QR-Code scannen"
        }"#,
    )
    .unwrap();
    let out_root = dir.join("out");

    let output = cargo_bin()
        .args([
            "--ssid", "Rohan",
            "--password", "pw",
            "--logo", logo.to_str().unwrap(),
            "--template", template.to_str().unwrap(),
            "--config", config_path.to_str().unwrap(),
            "--output", out_root.to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success(), "Command failed: {:?}", output);
    let texts = extract_text(&run_dir(&out_root).join("wifi_card.pdf"));
    assert!(texts.iter().any(|t| t == "Rohan"));
    assert!(texts.iter().any(|t| t == "pw"));
}
