use fern::Dispatch;
use log::LevelFilter;
use std::{path::Path, time::Instant};

pub fn setup_logging(log_level: LevelFilter, log_file: Option<&Path>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut dispatch = Dispatch::new()
        .format(move |out, msg, record| {
            out.finish(format_args!(
                "{: >11.3} {: >5} {}",
                start.elapsed().as_secs_f32(),
                record.level(),
                msg
            ))
        })
        .level(log_level)
        .chain(std::io::stdout());

    if let Some(path) = log_file {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}
