use simplemidi_io::MidiClient;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let client = match MidiClient::shared() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let inventory = match client.inventory() {
        Ok(inventory) => inventory,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    println!("=== MIDI Sources ===");
    if inventory.sources.is_empty() {
        println!("  (none found)");
    }
    for info in &inventory.sources {
        println!(
            "  [{}] {}",
            info.endpoint.0,
            info.name.as_deref().unwrap_or("(no name)")
        );
    }

    println!("\n=== MIDI Destinations ===");
    if inventory.destinations.is_empty() {
        println!("  (none found)");
    }
    for info in &inventory.destinations {
        println!(
            "  [{}] {}",
            info.endpoint.0,
            info.name.as_deref().unwrap_or("(no name)")
        );
    }

    client.log_inventory();
}
