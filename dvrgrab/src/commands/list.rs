use crate::{commands::DeviceOpts, progress::ByteSize, recording::Recording};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use mindrpc::{Command, Session};

/// List recordings available on a device.
#[derive(Debug, Args)]
pub struct List {
    #[command(flatten)]
    device: DeviceOpts,

    /// Maximum number of recordings to fetch.
    #[arg(long, default_value_t = 50)]
    count: u32,
}

impl List {
    pub fn execute(self) -> Result<()> {
        let (device, identity) = self.device.resolve()?;
        let mut session =
            Session::connect(&device.host, device.rpc_port, &identity, &device.mak)?;

        let mut search = Command::recording_search(&device.body_id(), 0, self.count);
        search.execute(&mut session)?;
        let recordings: Vec<Recording> = search.records("recording")?;

        if recordings.is_empty() {
            println!("No recordings found on {}.", device.host);
            return Ok(());
        }

        for recording in &recordings {
            let duration = recording
                .duration
                .map(|secs| format!("{}m", secs / 60))
                .unwrap_or_else(|| "?".to_owned());
            let size = recording
                .size
                .map(|bytes| ByteSize(bytes).to_string())
                .unwrap_or_else(|| "?".to_owned());
            let protection = if recording.copy_protected() {
                " (copy protected)".red().to_string()
            } else {
                String::new()
            };

            println!(
                "{:>6} {:>10}  {} {}{}",
                duration,
                size,
                recording.recording_id.dimmed(),
                recording.title.bold(),
                protection,
            );

            if let Some(subtitle) = &recording.subtitle {
                println!("{:>19}{}", "", subtitle.dimmed());
            }
        }

        Ok(())
    }
}
