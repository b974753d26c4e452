use std::fs;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use image::{Rgb, RgbImage};
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

#[fixture]
fn dataset() -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, color) in [("red_shirt", [220, 20, 20]), ("green_hat", [20, 200, 40])] {
        let path = dir.path().join(format!("{name}.png"));
        RgbImage::from_pixel(48, 32, Rgb(color)).save(path).unwrap();
    }
    let path = dir.path().join("blue_DENIM.jpg");
    RgbImage::from_pixel(32, 48, Rgb([10, 10, 230])).save(path).unwrap();
    fs::write(dir.path().join("corrupt.jpg"), b"not an image").unwrap();
    dir
}

#[rstest]
fn build_and_search(dataset: TempDir) -> Result<()> {
    let conf_dir = TempDir::new()?;

    cargo_run!("visearch", "-c", conf_dir.path(), "build", dataset.path(), "--no-copy")
        .success();
    assert!(conf_dir.path().join("index.flat").is_file());
    assert!(conf_dir.path().join("metadata.json").is_file());

    let query = dataset.path().join("green_hat.png");
    cargo_run!("visearch", "-c", conf_dir.path(), "search", &query, "-k", "1")
        .success()
        .stdout(predicate::str::contains("Green Hat"))
        .stdout(predicate::str::contains(query.to_str().unwrap()));

    cargo_run!("visearch", "-c", conf_dir.path(), "show", "--records")
        .success()
        .stdout(predicate::str::contains("图片数量: 3"))
        .stdout(predicate::str::contains("Blue Denim"));

    Ok(())
}

#[rstest]
fn search_json_output(dataset: TempDir) -> Result<()> {
    let conf_dir = TempDir::new()?;
    cargo_run!("visearch", "-c", conf_dir.path(), "build", dataset.path(), "--no-copy")
        .success();

    let query = dataset.path().join("red_shirt.png");
    let output = Command::cargo_bin("visearch")?
        .arg("-c")
        .arg(conf_dir.path())
        .arg("search")
        .arg(&query)
        .args(["--output-format", "json"])
        .output()?;
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let result = result.as_array().unwrap();
    assert_eq!(result.len(), 3);
    assert_eq!(result[0]["distance"], 0.0);
    assert_eq!(result[0]["record"]["displayName"], "Red Shirt");
    Ok(())
}

#[rstest]
fn copies_into_upload_dir(dataset: TempDir) -> Result<()> {
    let conf_dir = TempDir::new()?;
    let upload = conf_dir.path().join("uploads");

    cargo_run!(
        "visearch",
        "-c",
        conf_dir.path(),
        "build",
        dataset.path(),
        "--upload-dir",
        &upload,
        "--public-url",
        "http://img.local/data"
    )
    .success();

    assert!(upload.join("red_shirt.png").is_file());
    let metadata = fs::read_to_string(conf_dir.path().join("metadata.json"))?;
    assert!(metadata.contains("http://img.local/data/green_hat.png"));
    Ok(())
}

#[rstest]
fn export_embeddings(dataset: TempDir) -> Result<()> {
    let conf_dir = TempDir::new()?;
    let output = conf_dir.path().join("vectors.npy");

    cargo_run!("visearch", "-c", conf_dir.path(), "build", dataset.path(), "--no-copy")
        .success();
    cargo_run!("visearch", "-c", conf_dir.path(), "export", &output).success();
    assert!(output.is_file());
    Ok(())
}

#[rstest]
fn search_with_different_options(dataset: TempDir) -> Result<()> {
    let conf_dir = TempDir::new()?;
    cargo_run!("visearch", "-c", conf_dir.path(), "build", dataset.path(), "--no-copy")
        .success();

    let query = dataset.path().join("red_shirt.png");
    cargo_run!("visearch", "-c", conf_dir.path(), "search", &query, "--resize", "300")
        .failure()
        .stderr(predicate::str::contains("预处理参数"));
    cargo_run!("visearch", "-c", conf_dir.path(), "search", &query, "--grid", "4")
        .failure()
        .stderr(predicate::str::contains("grid-pool-8"));

    cargo_run!("visearch", "-c", conf_dir.path(), "show")
        .success()
        .stdout(predicate::str::contains("特征提取: grid-pool-8"));
    Ok(())
}

#[test]
fn search_without_index() -> Result<()> {
    let conf_dir = TempDir::new()?;
    let image = conf_dir.path().join("query.png");
    RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])).save(&image)?;

    cargo_run!("visearch", "-c", conf_dir.path(), "search", &image)
        .failure()
        .stderr(predicate::str::contains("索引不可用"));
    Ok(())
}

#[test]
fn empty_directory_is_not_an_error() -> Result<()> {
    let conf_dir = TempDir::new()?;
    let dataset = TempDir::new()?;

    cargo_run!("visearch", "-c", conf_dir.path(), "build", dataset.path()).success();
    assert!(!conf_dir.path().join("index.flat").exists());
    assert!(!conf_dir.path().join("metadata.json").exists());
    Ok(())
}
