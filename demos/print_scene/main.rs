use libflate::gzip::Decoder;
use mayafile::parsers::{binary, text, ParseOutcome};
use mayafile::{build_evaluation_graph, AttributeStore, HandlerRegistry, ReaderOptions};
use std::{
    env,
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

fn read_scene(path: &Path, options: &ReaderOptions) -> Result<ParseOutcome, io::Error> {
    let mut file = File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    if data.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = Decoder::new(&data[..])?;
        let mut gzip_data = Vec::new();
        decoder.read_to_end(&mut gzip_data)?;

        data = gzip_data;
    }

    Ok(if binary::is_binary(&data) {
        binary::parse_binary(&data, options)
    } else {
        text::parse_text(&text::decode_source(&data), options)
    })
}

fn do_it(path: &Path, options: &ReaderOptions) -> Result<(), io::Error> {
    println!("{}", path.display());
    let outcome = read_scene(path, options)?;
    if let Some(error) = &outcome.error {
        println!("  stopped early: {}", error);
    }

    let scene = outcome.scene;
    println!(
        "  {:?} {}: {} nodes, {} connections, {} raw statements, {} chunks",
        scene.format.dialect,
        scene.format.version.as_deref().unwrap_or("?"),
        scene.node_count(),
        scene.connections.len(),
        scene.raw_statements.len(),
        scene.chunks.len()
    );
    for node in scene.nodes() {
        println!(
            "    {} ({}) {} attributes",
            node.name(),
            node.node_type,
            node.attribute_count()
        );
    }

    let mut graph = build_evaluation_graph(&scene, &mut HandlerRegistry::default());
    let mut store = AttributeStore::new();
    store.seed_from_scene(&scene);
    let report = graph.evaluate(&mut store);
    println!(
        "  evaluated {} units, {} skipped, {} failed, {} on cycles",
        report.computed.len(),
        report.skipped.len(),
        report.diagnostics.len(),
        graph.cycle_nodes().len()
    );
    for diagnostic in &report.diagnostics {
        println!("    {}: {}", diagnostic.unit, diagnostic.error);
    }

    Ok(())
}

fn is_scene(path: &Path) -> bool {
    let name = path.to_string_lossy();
    [".ma", ".mb", ".ma.gz", ".mb.gz"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

/// Usage: `print_scene [directory] [options.ron]`
pub fn main() -> Result<(), io::Error> {
    let mut args = env::args_os().skip(1);
    let root = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("demos/scene_files"));
    let options = match args.next() {
        Some(path) => ReaderOptions::load(Path::new(&path))?,
        None => ReaderOptions::default(),
    };

    for entry in WalkDir::new(&root) {
        let entry = entry.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        if entry.path().is_file() && is_scene(entry.path()) {
            do_it(entry.path(), &options)?;
        }
    }

    Ok(())
}
