/// Format a collection of items as strings separated by a comma.
pub fn format_comma_delimited<T: std::fmt::Display>(
    items: impl IntoIterator<Item = T>,
) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
