use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::llm::media::file_to_data_url;
use crate::state::{AppState, OutfitEvent};
use crate::tryon::{Background, OutfitRecord, OutfitRequest, OutfitSize, OutfitStatus, UserProfile};
use crate::utils::logging::read_recent_log_lines;

const DEFAULT_LOG_TAIL: usize = 20;
const DESCRIPTION_PREVIEW_CHARS: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Profile {
        photo: PathBuf,
        age: u32,
        height: u32,
        weight: u32,
    },
    ClearProfile,
    Outfit {
        photo: Option<PathBuf>,
        size: OutfitSize,
        background: Background,
        description: Option<String>,
    },
    List,
    Show(String),
    Remove(String),
    Save {
        id: String,
        position: usize,
    },
    Logs(usize),
    Quit,
}

pub enum Flow {
    Continue,
    Quit,
}

/// Paths and limits the console needs beyond the session state.
#[derive(Debug, Clone)]
pub struct ConsoleContext {
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
}

pub fn help_text() -> &'static str {
    "Commands:
  profile <photo> <age> <height-cm> <weight-kg>   save your profile
  clear-profile                                   remove the saved profile
  outfit [--size XS|S|M|L|XL|XXL] [--background original|white] [--photo <path>] [description...]
  list                                            show all outfits
  show <id>                                       show one outfit
  remove <id>                                     delete an outfit
  save <id> <n>                                   write image n of an outfit to disk
  logs [n]                                        show recent log lines
  help | quit"
}

fn parse_number<T: std::str::FromStr>(value: Option<&str>, name: &str) -> Result<T> {
    let value = value.ok_or_else(|| anyhow!("Missing value for {name}"))?;
    value
        .parse::<T>()
        .map_err(|_| anyhow!("Invalid {name}: {value}"))
}

fn parse_positive(value: Option<&str>, name: &str) -> Result<u32> {
    let number: u32 = parse_number(value, name)?;
    if number == 0 {
        return Err(anyhow!("{name} must be greater than zero"));
    }
    Ok(number)
}

fn parse_outfit_args(args: &[&str]) -> Result<Command> {
    let mut photo = None;
    let mut size = OutfitSize::default();
    let mut background = Background::default();
    let mut words = Vec::new();

    let mut index = 0;
    while index < args.len() {
        match args[index] {
            "--size" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --size"))?;
                size = value.parse().map_err(|err: String| anyhow!(err))?;
            }
            "--background" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --background"))?;
                background = value.parse().map_err(|err: String| anyhow!(err))?;
            }
            "--photo" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --photo"))?;
                photo = Some(PathBuf::from(value));
            }
            other if other.starts_with("--") => {
                return Err(anyhow!("Unknown outfit option: {other}"));
            }
            word => words.push(word),
        }
        index += 1;
    }

    let description = if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    };

    Ok(Command::Outfit {
        photo,
        size,
        background,
        description,
    })
}

pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let args: Vec<&str> = line.split_whitespace().collect();
    let Some((name, rest)) = args.split_first() else {
        return Ok(None);
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "help" | "?" => Command::Help,
        "profile" => Command::Profile {
            photo: PathBuf::from(
                rest.first()
                    .ok_or_else(|| anyhow!("Usage: profile <photo> <age> <height> <weight>"))?,
            ),
            age: parse_positive(rest.get(1).copied(), "age")?,
            height: parse_positive(rest.get(2).copied(), "height")?,
            weight: parse_positive(rest.get(3).copied(), "weight")?,
        },
        "clear-profile" => Command::ClearProfile,
        "outfit" => parse_outfit_args(rest)?,
        "list" | "ls" => Command::List,
        "show" => Command::Show(
            rest.first()
                .ok_or_else(|| anyhow!("Usage: show <id>"))?
                .to_string(),
        ),
        "remove" | "rm" => Command::Remove(
            rest.first()
                .ok_or_else(|| anyhow!("Usage: remove <id>"))?
                .to_string(),
        ),
        "save" => Command::Save {
            id: rest
                .first()
                .ok_or_else(|| anyhow!("Usage: save <id> <n>"))?
                .to_string(),
            position: parse_number(rest.get(1).copied(), "image number")?,
        },
        "logs" => Command::Logs(match rest.first().copied() {
            Some(value) => parse_number(Some(value), "line count")?,
            None => DEFAULT_LOG_TAIL,
        }),
        "quit" | "exit" => Command::Quit,
        other => return Err(anyhow!("Unknown command: {other}. Type 'help' for usage.")),
    };

    Ok(Some(command))
}

fn preview(text: &str) -> String {
    if text.chars().count() <= DESCRIPTION_PREVIEW_CHARS {
        return text.to_string();
    }
    let truncated: String = text.chars().take(DESCRIPTION_PREVIEW_CHARS).collect();
    format!("{truncated}...")
}

pub fn describe_status(status: &OutfitStatus) -> String {
    match status {
        OutfitStatus::Pending => "generating...".to_string(),
        OutfitStatus::Succeeded { images } => format!("ready ({} image(s))", images.len()),
        OutfitStatus::Failed { reason } => format!("failed: {reason}"),
    }
}

pub fn render_record_line(record: &OutfitRecord) -> String {
    let subject = match (record.request.description(), record.request.photo()) {
        (Some(description), _) => preview(description),
        (None, Some(_)) => "(outfit photo)".to_string(),
        (None, None) => "(empty)".to_string(),
    };
    format!(
        "{}  [{} / {}]  {}  {}",
        record.id,
        record.request.size,
        record.request.background,
        subject,
        describe_status(&record.status)
    )
}

pub fn render_record_detail(record: &OutfitRecord) -> String {
    let mut lines = vec![
        format!("Outfit {}", record.id),
        format!("  created:     {}", record.created_at.to_rfc3339()),
        format!("  size:        {}", record.request.size),
        format!("  background:  {}", record.request.background),
        format!(
            "  description: {}",
            record.request.description().unwrap_or("-")
        ),
        format!(
            "  photo:       {}",
            record.request.photo_mime_type().unwrap_or("-")
        ),
        format!("  status:      {}", describe_status(&record.status)),
    ];
    for (index, image) in record.images().iter().enumerate() {
        let mime = image
            .strip_prefix("data:")
            .and_then(|rest| rest.split(';').next())
            .unwrap_or("image");
        lines.push(format!(
            "  image {}:     {} ({} chars)",
            index + 1,
            mime,
            image.len()
        ));
    }
    lines.join("\n")
}

pub fn render_event(event: &OutfitEvent) -> String {
    match event {
        OutfitEvent::Resolved { id, status } => {
            format!("Outfit {id} {}", describe_status(status))
        }
    }
}

/// Runs one console command and returns the text to show.
pub async fn execute(state: &AppState, context: &ConsoleContext, command: Command) -> Result<(String, Flow)> {
    let reply = match command {
        Command::Help => help_text().to_string(),
        Command::Profile {
            photo,
            age,
            height,
            weight,
        } => {
            let (data_url, mime_type) = file_to_data_url(&photo).await?;
            state.set_profile(UserProfile {
                photo: data_url,
                photo_mime_type: mime_type,
                age,
                height,
                weight,
            });
            "Profile saved. You can now generate virtual try-on images.".to_string()
        }
        Command::ClearProfile => match state.clear_profile() {
            Some(_) => "Profile cleared.".to_string(),
            None => "No profile was set.".to_string(),
        },
        Command::Outfit {
            photo,
            size,
            background,
            description,
        } => {
            let (photo, photo_mime_type) = match photo {
                Some(path) => {
                    let (data_url, mime_type) = file_to_data_url(&path).await?;
                    (Some(data_url), Some(mime_type))
                }
                None => (None, None),
            };
            if state.is_busy() {
                warn!(
                    "Submitting while {} generation(s) are still running",
                    state.in_flight_count()
                );
            }
            let id = state.submit(OutfitRequest {
                description,
                photo,
                photo_mime_type,
                size,
                background,
            })?;
            info!("Console submitted outfit {}", id);
            format!("Outfit {id} queued. Generating images...")
        }
        Command::List => {
            let outfits = state.outfits();
            if outfits.is_empty() {
                "No outfits yet.".to_string()
            } else {
                let mut lines = vec![format!(
                    "{} outfit(s), {} generating",
                    outfits.len(),
                    state.pending_count()
                )];
                lines.extend(outfits.iter().map(render_record_line));
                lines.join("\n")
            }
        }
        Command::Show(id) => match state.outfit(&id) {
            Some(record) => render_record_detail(&record),
            None => format!("No outfit with id {id}"),
        },
        Command::Remove(id) => match state.remove(&id) {
            Some(_) => format!("Outfit {id} removed."),
            None => format!("No outfit with id {id}"),
        },
        Command::Save { id, position } => {
            let path = state.save_image(&id, position, &context.output_dir).await?;
            format!("Saved {}", path.display())
        }
        Command::Logs(count) => {
            match read_recent_log_lines(&context.log_dir, "tryon.log", count)? {
                Some(tail) => format!("{}:\n{}", tail.path.display(), tail.lines.join("\n")),
                None => "No log lines available.".to_string(),
            }
        }
        Command::Quit => return Ok(("Bye.".to_string(), Flow::Quit)),
    };
    Ok((reply, Flow::Continue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_profile_command() {
        let command = parse_command("profile me.png 30 180 75").unwrap().unwrap();
        assert_eq!(
            command,
            Command::Profile {
                photo: PathBuf::from("me.png"),
                age: 30,
                height: 180,
                weight: 75
            }
        );
        assert!(parse_command("profile me.png 30 0 75").is_err());
        assert!(parse_command("profile me.png 30").is_err());
    }

    #[test]
    fn parses_outfit_options_anywhere() {
        let command = parse_command("outfit red --size xl dress --background white")
            .unwrap()
            .unwrap();
        assert_eq!(
            command,
            Command::Outfit {
                photo: None,
                size: OutfitSize::XL,
                background: Background::White,
                description: Some("red dress".into()),
            }
        );

        let command = parse_command("outfit --photo coat.jpg").unwrap().unwrap();
        assert_eq!(
            command,
            Command::Outfit {
                photo: Some(PathBuf::from("coat.jpg")),
                size: OutfitSize::M,
                background: Background::Original,
                description: None,
            }
        );

        assert!(parse_command("outfit --size huge").is_err());
        assert!(parse_command("outfit --colour red").is_err());
    }

    #[test]
    fn blank_lines_are_ignored_and_unknown_commands_rejected() {
        assert!(parse_command("   ").unwrap().is_none());
        assert!(parse_command("dance").is_err());
        assert_eq!(parse_command("LOGS").unwrap(), Some(Command::Logs(DEFAULT_LOG_TAIL)));
        assert_eq!(
            parse_command("save 123-abc 2").unwrap(),
            Some(Command::Save {
                id: "123-abc".into(),
                position: 2
            })
        );
    }

    #[test]
    fn record_lines_show_status() {
        let mut record = OutfitRecord::pending(OutfitRequest {
            description: Some("a very long description ".repeat(5)),
            ..Default::default()
        });
        let line = render_record_line(&record);
        assert!(line.contains("generating..."));
        assert!(line.contains("..."));

        record.status = OutfitStatus::Failed {
            reason: "Image generation failed: quota".into(),
        };
        assert!(render_record_line(&record).ends_with("failed: Image generation failed: quota"));

        record.status = OutfitStatus::Succeeded {
            images: vec!["data:image/png;base64,QUJD".into()],
        };
        let detail = render_record_detail(&record);
        assert!(detail.contains("ready (1 image(s))"));
        assert!(detail.contains("image 1:     image/png"));
    }
}
