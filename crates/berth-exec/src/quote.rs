//! POSIX shell quoting for command lines that cross a shell boundary
//! (`sh -c` locally, the remote login shell behind `ssh`).

use std::borrow::Cow;

use shell_escape::unix::escape;

/// Quote one word; words made only of safe characters are returned unchanged.
pub fn quote(word: &str) -> String {
    escape(Cow::Borrowed(word)).into_owned()
}

/// Quote every word and join them with single spaces.
pub fn join<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
