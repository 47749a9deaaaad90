use anyhow::Result;
use std::panic;
use voxstream::audio;

/// Print the input devices the microphone can open.
pub(crate) fn list_input_devices() -> Result<()> {
    // Support VOXSTREAM_TEST_DEVICES for testing
    let devices = if let Ok(raw) = std::env::var("VOXSTREAM_TEST_DEVICES") {
        raw.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    } else {
        audio::list_input_devices().unwrap_or_else(|err| {
            eprintln!("Failed to list audio input devices: {err}");
            Vec::new()
        })
    };

    if devices.is_empty() {
        println!("No audio input devices detected.");
    } else {
        println!("Available audio input devices:");
        for name in devices {
            println!("  - {name}");
        }
    }
    Ok(())
}

/// Record panics in the crash log before the default hook prints them.
pub(crate) fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        voxstream::log_panic(info);
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        voxstream::log_debug(&format!("panic at {location}"));
        previous(info);
    }));
}
