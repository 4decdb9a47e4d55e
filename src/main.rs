use tunepeek::model::MediaFilter;

#[derive(Debug, Default)]
struct CliArgs {
    config_dir: Option<String>,
    media: Option<MediaFilter>,
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    tunepeek::logging::init_logging()?;

    tunepeek::app::run_with_startup(tunepeek::app::AppStartupOptions {
        config_dir: args.config_dir.map(Into::into),
        media_filter: args.media,
    })
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--config-dir" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--config-dir requires a path");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--config-dir cannot be empty");
                }
                out.config_dir = Some(value.trim().to_string());
            }
            "--media" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--media requires a value");
                };
                out.media = Some(value.parse()?);
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument {other}"),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("tunepeek");
    println!("  --config-dir path   Where settings.json and store.json live");
    println!("  --media type        Initial media filter (all, music, movie, podcast, ...)");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_dir_and_media() {
        let args = parse_args(vec![
            String::from("--config-dir"),
            String::from("/tmp/tp"),
            String::from("--media"),
            String::from("podcast"),
        ])
        .expect("parse");
        assert_eq!(args.config_dir.as_deref(), Some("/tmp/tp"));
        assert_eq!(args.media, Some(MediaFilter::Podcast));
    }

    #[test]
    fn rejects_unknown_and_incomplete_arguments() {
        assert!(parse_args(vec![String::from("--loud")]).is_err());
        assert!(parse_args(vec![String::from("--media")]).is_err());
        assert!(parse_args(vec![String::from("--media"), String::from("vinyl")]).is_err());
    }
}
