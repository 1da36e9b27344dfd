//! CLI tool to run minimap localization on a saved screenshot.
//! Usage: cargo run -p nav-vision --features cli --bin locate_frame -- \
//!     <screenshot.png> <data_dir> <region_id> [output_dir]

use anyhow::{Context, Result};
use nav_capture::{crop_rgb, regions};
use nav_vision::{
    LargeMapIndex, LocalizationEngine, LocalizerConfig, LocateRequest, MiniMapPreprocessor,
    MinimapAssets, MinimapConfig,
};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!(
            "Usage: {} <screenshot.png> <data_dir> <region_id> [output_dir]",
            args[0]
        );
        std::process::exit(1);
    }

    let input_path = PathBuf::from(&args[1]);
    let data_dir = PathBuf::from(&args[2]);
    let region_id = &args[3];
    let output_dir = args
        .get(4)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./debug_output"));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    println!("Loading image: {}", input_path.display());
    let frame = image::open(&input_path)
        .with_context(|| format!("Failed to open {}", input_path.display()))?
        .to_rgba8();
    println!("Image size: {}x{}", frame.width(), frame.height());

    let index = LargeMapIndex::load(&data_dir)?;
    let map = index.get(region_id)?;
    println!(
        "Map '{}': {}x{}, floor {}, {} landmarks",
        map.key(),
        map.width(),
        map.height(),
        map.floor(),
        map.landmark_templates.len()
    );

    let assets = MinimapAssets::load(&data_dir.join("minimap"))?;
    let prep = Arc::new(MiniMapPreprocessor::new(assets, MinimapConfig::default()));
    let crop = crop_rgb(&frame, &regions::minimap());
    let minimap = prep.analyze(crop, map.another_floor_possible(), &map.landmark_templates);

    println!("\n=== Minimap ===");
    match minimap.angle() {
        Some(a) => println!("Heading: {:.3}°", a),
        None => println!("Heading: NOT FOUND"),
    }
    println!("Enemy alert: {}", minimap.enemy_alert());
    for (id, hits) in minimap.special_points() {
        println!("Landmark {}: {} hit(s)", id, hits.len());
    }
    minimap.raw().save(output_dir.join("minimap_raw.png"))?;
    minimap
        .origin_del_radio()
        .save(output_dir.join("minimap_no_radar.png"))?;
    minimap.road_mask().save(output_dir.join("road_mask.png"))?;
    minimap
        .road_mask_with_edge()
        .save(output_dir.join("road_mask_edge.png"))?;
    minimap.arrow_mask().save(output_dir.join("arrow_mask.png"))?;

    println!("\n=== Localization ===");
    let engine = LocalizationEngine::new(LocalizerConfig::default());
    match engine
        .cal_character_pos(&map, &minimap, &LocateRequest::default())
        .await
    {
        Some(m) => {
            let c = m.center();
            println!(
                "Position: ({:.1}, {:.1}) scale {:.2} confidence {:.3}",
                c.x, c.y, m.scale, m.confidence
            );
        }
        None => println!("Position: NOT FOUND"),
    }

    println!("\nDebug images saved to: {}", output_dir.display());
    Ok(())
}
