use serde::Deserialize;

/// `PUT /users/me`; an absent `full_name` leaves the profile unchanged,
/// an explicit `null` clears it.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default, deserialize_with = "double_option")]
    pub full_name: Option<Option<String>>,
}

/// Keeps "field present but null" apart from "field absent"; pair with
/// `#[serde(default)]`.
pub(crate) fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinguishes_absent_from_null() {
        let absent: UpdateProfileRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.full_name, None);
        let null: UpdateProfileRequest = serde_json::from_str(r#"{"full_name":null}"#).unwrap();
        assert_eq!(null.full_name, Some(None));
        let set: UpdateProfileRequest = serde_json::from_str(r#"{"full_name":"Ann"}"#).unwrap();
        assert_eq!(set.full_name, Some(Some("Ann".into())));
    }
}
