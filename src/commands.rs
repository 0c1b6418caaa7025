//! CLI subcommands and their arguments.

use chrono::{NaiveDate, Utc};
use clap::{Args, Subcommand};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use sha2::{Digest, Sha256};

use crate::diary::{CreateSiteDiaryInput, Weather};

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
  /// List all site diaries
  List,
  /// Show one site diary
  Show {
    /// Diary id
    id: String,
  },
  /// Record a new site diary (requires a connection)
  Create(CreateArgs),
  /// Show the AI summary of the past week
  Summary,
  /// Keep the diary list on screen; press Enter to refresh, Ctrl-D to quit
  Watch,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct CreateArgs {
  #[arg(long)]
  pub title: String,

  /// Day of the entry, YYYY-MM-DD (default: today)
  #[arg(long)]
  pub date: Option<String>,

  #[arg(long)]
  pub created_by: String,

  #[arg(long)]
  pub content: Option<String>,

  /// Temperature in degrees Celsius
  #[arg(long, requires = "weather", allow_hyphen_values = true)]
  pub temperature: Option<i32>,

  /// Weather description, e.g. "sunny"
  #[arg(long, requires = "temperature")]
  pub weather: Option<String>,

  /// Person on site (repeatable)
  #[arg(long = "attendee")]
  pub attendees: Vec<String>,

  /// Attachment URI (repeatable)
  #[arg(long = "attachment")]
  pub attachments: Vec<String>,
}

impl CreateArgs {
  /// Validate and turn into mutation input with a freshly generated id.
  pub fn into_input(self) -> Result<CreateSiteDiaryInput> {
    let title = self.title.trim().to_string();
    if title.is_empty() {
      return Err(eyre!("Title must not be empty"));
    }
    let created_by = self.created_by.trim().to_string();
    if created_by.is_empty() {
      return Err(eyre!("--created-by must not be empty"));
    }

    let date = match self.date {
      Some(date) => NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|e| eyre!("Invalid date '{}': {}", date, e))?,
      None => Utc::now().date_naive(),
    };

    let weather = match (self.temperature, self.weather) {
      (Some(temperature), Some(description)) => Some(Weather {
        temperature,
        description,
      }),
      _ => None,
    };

    Ok(CreateSiteDiaryInput {
      id: new_diary_id(&title),
      date: date.format("%Y-%m-%d").to_string(),
      title,
      created_by,
      content: self.content.filter(|c| !c.trim().is_empty()),
      weather,
      attendees: (!self.attendees.is_empty()).then_some(self.attendees),
      attachments: (!self.attachments.is_empty()).then_some(self.attachments),
    })
  }
}

/// Client-generated record id: 25 hex chars derived from the current time
/// and the title.
pub fn new_diary_id(title: &str) -> String {
  let mut hasher = Sha256::new();
  let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
  hasher.update(nanos.to_be_bytes());
  hasher.update(title.as_bytes());
  let mut id = hex::encode(hasher.finalize());
  id.truncate(25);
  id
}

#[cfg(test)]
mod tests {
  use super::*;

  fn args() -> CreateArgs {
    CreateArgs {
      title: " Formwork inspection ".to_string(),
      date: Some("2024-12-14".to_string()),
      created_by: "Jane Smith".to_string(),
      content: None,
      temperature: Some(-3),
      weather: Some("frost".to_string()),
      attendees: vec![],
      attachments: vec!["https://example.com/photo.jpg".to_string()],
    }
  }

  #[test]
  fn test_into_input() {
    let input = args().into_input().unwrap();
    assert_eq!(input.title, "Formwork inspection");
    assert_eq!(input.date, "2024-12-14");
    assert_eq!(input.id.len(), 25);
    assert_eq!(input.weather.unwrap().temperature, -3);
    assert_eq!(input.attendees, None);
    assert_eq!(input.attachments.unwrap().len(), 1);
  }

  #[test]
  fn test_rejects_bad_date_and_blank_title() {
    let bad_date = CreateArgs {
      date: Some("14/12/2024".to_string()),
      ..args()
    };
    assert!(bad_date.into_input().is_err());

    let blank = CreateArgs {
      title: "  ".to_string(),
      ..args()
    };
    assert!(blank.into_input().is_err());
  }

  #[test]
  fn test_default_date_is_today() {
    let input = CreateArgs { date: None, ..args() }.into_input().unwrap();
    assert_eq!(input.date, Utc::now().date_naive().format("%Y-%m-%d").to_string());
  }

  #[test]
  fn test_ids_differ() {
    assert_ne!(new_diary_id("a"), new_diary_id("b"));
  }
}
