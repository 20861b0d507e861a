//! Row types for the user directory and verification tokens.

/// A registered account.
///
/// `id` and `handle` never change after creation. `password` and `salt` are
/// always set together; `hash_lanes` records the argon2 parallelism used when
/// the hash was produced so verification replays it instead of re-deriving it
/// from the current host.
#[derive(Clone, Debug)]
pub struct Person {
    pub id: String,
    pub handle: String,
    pub password: Vec<u8>,
    pub salt: Vec<u8>,
    pub hash_lanes: i32,
    pub created_at_unix: i64,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl Person {
    /// Display name, falling back to the handle when none was set.
    #[must_use]
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.handle)
    }
}

/// A pending email-verification token bound to a person.
///
/// Consumed exactly once: the row is deleted whenever it is matched against,
/// whether or not the presented value was correct.
#[derive(Clone, Debug)]
pub struct RegistrationToken {
    pub person_id: String,
    pub email: String,
    pub token: String,
    pub expires_at_unix: i64,
    pub refresh_token: String,
}

#[cfg(test)]
mod tests {
    use super::Person;

    fn person(display_name: Option<&str>) -> Person {
        Person {
            id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            handle: "alice".to_string(),
            password: vec![0; 64],
            salt: vec![0; 64],
            hash_lanes: 2,
            created_at_unix: 0,
            display_name: display_name.map(str::to_string),
            email: None,
        }
    }

    #[test]
    fn name_prefers_display_name() {
        assert_eq!(person(Some("Alice W.")).name(), "Alice W.");
    }

    #[test]
    fn name_falls_back_to_handle() {
        assert_eq!(person(None).name(), "alice");
    }
}
