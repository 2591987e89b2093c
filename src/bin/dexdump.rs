use std::env;
use std::error::Error;
use std::fs;
use std::process::exit;

use dexread::map_list::section_name;
use dexread::DexFile;

//Usage: dexdump <dex-file>
fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: dexdump <dex-file>");
        exit(2);
    }

    // Do everything else with the error trap
    match dump_dex(&args[1]) {
        Ok(_) => {}
        Err(e) => {
            eprintln!("Aborted due to error: {}", e);
            exit(1);
        }
    }
}

/* This is where all the processing takes place, to make error handling easier */
fn dump_dex(path: &str) -> Result<(), Box<dyn Error>> {
    let bytes = fs::read(path)?;
    let dex = DexFile::from_bytes(&bytes)?;

    let h = &dex.header;
    println!("DEX version {:03}, {} bytes", h.version(), h.file_size);
    println!(
        "checksum {:#010x} ({})",
        h.checksum,
        if h.verify_checksum(&bytes) { "ok" } else { "MISMATCH" }
    );
    println!(
        "strings: {}  types: {}  protos: {}  fields: {}  methods: {}  classes: {}",
        dex.strings.len(),
        dex.type_ids.len(),
        dex.proto_ids.len(),
        dex.field_ids.len(),
        dex.method_ids.len(),
        dex.class_defs.len()
    );

    println!("\nmap sections:");
    for item in &dex.map.0 {
        println!(
            "  {:<28} size {:>6} at {:#010x}",
            section_name(item.item_type),
            item.size,
            item.offset
        );
    }

    println!("\nclasses:");
    for (i, def) in dex.class_defs.iter().enumerate() {
        let data = &dex.class_data[i];
        println!(
            "  {} ({} static / {} instance fields, {} direct / {} virtual methods)",
            dex.class_name(def).unwrap_or("<unknown>"),
            data.static_fields.len(),
            data.instance_fields.len(),
            data.direct_methods.len(),
            data.virtual_methods.len()
        );
        if let Some(source) = dex.source_file(def) {
            println!("    source: {}", source);
        }
    }

    Ok(())
}
