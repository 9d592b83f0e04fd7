//-
// Copyright (c) 2026, The igrab developers
//
// This file is part of igrab.
//
// igrab is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// igrab is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// igrab. If not, see <http://www.gnu.org/licenses/>.

/// Whether `name` can be used directly as a folder directory name.
///
/// Empty names, names starting with `.` (which covers `.`, `..` and hidden
/// directories), path separators and control characters are refused.
/// Whether the OS then accepts the name is its own business.
pub fn is_safe_name(name: &str) -> bool {
    match name.chars().next() {
        None | Some('.') => false,
        Some(_) => !name
            .chars()
            .any(|c| '/' == c || '\\' == c || c.is_ascii_control()),
    }
}

/// Map a remote folder name onto a local folder directory name.
///
/// Hierarchy delimiters become `.`, as in Maildir++, so `Archive/2020` is
/// stored as `Archive.2020`.
pub fn local_folder_name(remote: &str) -> String {
    remote.replace('/', ".")
}
