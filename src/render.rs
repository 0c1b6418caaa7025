//! Plain-text rendering of query views.
//!
//! Stale data with an error renders the data under a one-line warning; an
//! error with nothing cached renders the error alone.

use std::fmt::Write;

use crate::diary::SiteDiary;
use crate::query::QueryView;

const OFFLINE_BANNER: &str = "[offline] showing cached data";

/// Status lines shown above the data.
pub fn banner<T>(view: &QueryView<T>) -> Vec<String> {
  let mut lines = Vec::new();
  if view.is_offline {
    lines.push(OFFLINE_BANNER.to_string());
  }
  if let (Some(_), Some(error)) = (&view.data, &view.error) {
    lines.push(format!("[warning] {}", error));
  }
  if view.is_refetching {
    lines.push("[refreshing]".to_string());
  }
  lines
}

/// Render a list view.
pub fn diary_list(view: &QueryView<Vec<SiteDiary>>) -> String {
  let mut out = String::new();
  for line in banner(view) {
    let _ = writeln!(out, "{}", line);
  }

  match (&view.data, &view.error) {
    (Some(diaries), _) if diaries.is_empty() => {
      let _ = writeln!(out, "No site diaries yet.");
    }
    (Some(diaries), _) => {
      for diary in diaries {
        let _ = writeln!(out, "{}", list_row(diary));
      }
    }
    (None, Some(error)) => {
      let _ = writeln!(out, "Error: {}", error);
    }
    (None, None) if view.loading => {
      let _ = writeln!(out, "Loading...");
    }
    (None, None) if view.is_offline => {
      let _ = writeln!(out, "Nothing cached yet. Connect to load site diaries.");
    }
    (None, None) => {}
  }
  out
}

fn list_row(diary: &SiteDiary) -> String {
  let mut row = format!("{}  {:<10}  {}  ({})", diary.id, diary.date, diary.title, diary.created_by);
  if let Some(weather) = &diary.weather {
    let _ = write!(row, "  {}°C {}", weather.temperature, weather.description);
  }
  row
}

/// Render a detail view. `Some(None)` means the server has no such record.
pub fn diary_detail(id: &str, view: &QueryView<Option<SiteDiary>>) -> String {
  let mut out = String::new();
  for line in banner(view) {
    let _ = writeln!(out, "{}", line);
  }

  match (&view.data, &view.error) {
    (Some(Some(diary)), _) => {
      let _ = writeln!(out, "{}", diary.title);
      let _ = writeln!(out, "  id:         {}", diary.id);
      let _ = writeln!(out, "  date:       {}", diary.date);
      let _ = writeln!(out, "  created by: {}", diary.created_by);
      if let Some(weather) = &diary.weather {
        let _ = writeln!(out, "  weather:    {}°C {}", weather.temperature, weather.description);
      }
      if !diary.attendees.is_empty() {
        let _ = writeln!(out, "  attendees:  {}", diary.attendees.join(", "));
      }
      for attachment in &diary.attachments {
        let _ = writeln!(out, "  attachment: {}", attachment);
      }
      if let Some(content) = &diary.content {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", content);
      }
    }
    (Some(None), _) => {
      let _ = writeln!(out, "No site diary with id {}", id);
    }
    (None, Some(error)) => {
      let _ = writeln!(out, "Error: {}", error);
    }
    (None, None) if view.is_offline => {
      let _ = writeln!(out, "Site diary {} is not cached. Connect to load it.", id);
    }
    (None, None) => {}
  }
  out
}

pub fn weekly_summary(view: &QueryView<String>) -> String {
  let mut out = String::new();
  if view.disabled && view.data.is_none() {
    let _ = writeln!(
      out,
      "{}",
      if view.is_offline {
        "Weekly summary needs a network connection."
      } else {
        "Weekly summary is not available: set SITEDIARY_OPENAI_API_KEY to enable it."
      }
    );
    return out;
  }

  for line in banner(view) {
    let _ = writeln!(out, "{}", line);
  }
  match (&view.data, &view.error) {
    (Some(summary), _) => {
      let _ = writeln!(out, "{}", summary);
    }
    (None, Some(error)) => {
      let _ = writeln!(out, "Error: {}", error);
    }
    (None, None) => {}
  }
  out
}
