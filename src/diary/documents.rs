//! GraphQL documents sent by the client.

pub const GET_SITE_DIARIES: &str = r#"
  query {
    siteDiaries {
      id
      date
      title
      createdBy
      content
      weather {
        temperature
        description
      }
      attendees
      attachments
    }
  }
"#;

pub const GET_SITE_DIARY: &str = r#"
  query GetSiteDiary($id: String!) {
    siteDiary(id: $id) {
      id
      date
      title
      content
      createdBy
      weather {
        temperature
        description
      }
      attendees
      attachments
    }
  }
"#;

pub const CREATE_SITE_DIARY: &str = r#"
  mutation CreateSiteDiary($input: SiteDiaryInput!) {
    createSiteDiary(input: $input) {
      id
      date
      title
      createdBy
      content
      weather {
        temperature
        description
      }
      attendees
      attachments
    }
  }
"#;

pub const GET_WEEKLY_SUMMARY: &str = r#"
  query {
    weeklySummary
  }
"#;
