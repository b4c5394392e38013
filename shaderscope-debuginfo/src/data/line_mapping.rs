//! Instruction offset <-> source location mapping (no parsing, no file operations)

use crate::core::{DebugInfoError, InstructionOffset, Result, SourceLocation};
use crate::data::path::{basename, join_paths, normalize_path, path_ends_with};
use shaderscope_protocol::{LocationRef, ModuleSnapshot};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One located instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEntry {
    pub offset: InstructionOffset,
    pub location: SourceLocation,
    /// Call-site locations of enclosing inlined bodies, innermost caller first
    pub callers: Vec<SourceLocation>,
}

/// File matching strategy for source → offset lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathMatchOptions {
    pub match_suffix: bool,
    pub match_basename: bool,
    pub case_insensitive: bool,
}

impl Default for PathMatchOptions {
    fn default() -> Self {
        Self {
            match_suffix: true,
            match_basename: true,
            case_insensitive: false,
        }
    }
}

/// Bidirectional line table for one module
#[derive(Debug, Default)]
pub struct SourceLocationIndex {
    /// Entries in ingestion (offset) order
    entries: Vec<LineEntry>,

    /// Offset → entry index
    offset_to_entry: BTreeMap<InstructionOffset, usize>,

    /// (path key, line) → entry indices
    path_line_to_entries: HashMap<(String, u32), Vec<usize>>,

    /// Basename key → path keys, for flexible matching
    /// e.g., "lighting.hlsli" → ["/src/inc/lighting.hlsli"]
    basename_to_paths: HashMap<String, BTreeSet<String>>,

    /// Distinct paths in first-seen order
    files: Vec<String>,

    options: PathMatchOptions,
}

impl SourceLocationIndex {
    /// Build from the debug locations attached to a snapshot's instructions.
    /// Declare/value annotations carry no code and are not line-table rows.
    pub fn from_snapshot(snapshot: &ModuleSnapshot, options: PathMatchOptions) -> Result<Self> {
        let file_paths: Vec<String> = snapshot
            .files
            .iter()
            .map(|f| join_paths(&f.directory, &f.name))
            .collect();

        let resolve = |loc_ref: LocationRef| -> Result<(SourceLocation, Option<LocationRef>)> {
            let loc = snapshot
                .location(loc_ref)
                .ok_or_else(|| DebugInfoError::malformed(format!("missing location {loc_ref}")))?;
            let scope = snapshot
                .scope(loc.scope)
                .ok_or_else(|| DebugInfoError::malformed(format!("missing scope {}", loc.scope)))?;
            let file_path = file_paths
                .get(scope.file().index())
                .cloned()
                .ok_or_else(|| {
                    DebugInfoError::malformed(format!(
                        "scope {} references missing {}",
                        loc.scope,
                        scope.file()
                    ))
                })?;
            Ok((
                SourceLocation {
                    file_path,
                    line: loc.line,
                    column: loc.column,
                },
                loc.inlined_at,
            ))
        };

        let mut entries = Vec::new();
        for (offset, _fi, inst) in snapshot.instructions() {
            if inst.kind.is_debug_annotation() {
                continue;
            }
            let Some(loc_ref) = inst.location else {
                continue;
            };
            let (location, mut inlined_at) = resolve(loc_ref)?;
            let mut callers = Vec::new();
            // Chains are bounded by the location count; a longer walk means a cycle
            while let Some(at) = inlined_at {
                if callers.len() > snapshot.locations.len() {
                    return Err(DebugInfoError::malformed(format!(
                        "inlined-at cycle while resolving {loc_ref}"
                    )));
                }
                let (caller, next) = resolve(at)?;
                callers.push(caller);
                inlined_at = next;
            }
            entries.push(LineEntry {
                offset,
                location,
                callers,
            });
        }

        Ok(Self::from_entries(entries, options))
    }

    /// Create from line entries, kept in the given order
    pub fn from_entries(entries: Vec<LineEntry>, options: PathMatchOptions) -> Self {
        let mut index = Self {
            options,
            ..Default::default()
        };

        for (idx, entry) in entries.iter().enumerate() {
            index.offset_to_entry.insert(entry.offset, idx);

            let key = index.path_key(&entry.location.file_path);
            index
                .path_line_to_entries
                .entry((key.clone(), entry.location.line))
                .or_default()
                .push(idx);

            let base = basename(&key).to_string();
            let paths = index.basename_to_paths.entry(base).or_default();
            if paths.insert(key) {
                index.files.push(entry.location.file_path.clone());
            }
        }
        index.entries = entries;
        index
    }

    fn path_key(&self, path: &str) -> String {
        let normalized = normalize_path(path);
        if self.options.case_insensitive {
            normalized.to_lowercase()
        } else {
            normalized
        }
    }

    pub fn entries(&self) -> &[LineEntry] {
        &self.entries
    }

    pub fn total_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Files with at least one located instruction
    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn entry_at(&self, offset: InstructionOffset) -> Option<&LineEntry> {
        self.offset_to_entry
            .get(&offset)
            .and_then(|idx| self.entries.get(*idx))
    }

    /// Primary location followed by each inlined caller, innermost first;
    /// empty when the instruction has no location
    pub fn locations_from_instruction_offset(
        &self,
        offset: InstructionOffset,
    ) -> Vec<SourceLocation> {
        match self.entry_at(offset) {
            Some(entry) => std::iter::once(entry.location.clone())
                .chain(entry.callers.iter().cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Resolve a user-supplied path to the stored path keys it denotes.
    /// Strategies, first hit wins:
    /// 1. Exact normalized path
    /// 2. Component-wise suffix (e.g., "inc/light.hlsli" matches "/src/inc/light.hlsli")
    /// 3. Basename, when it is unique in the module
    fn matching_paths(&self, file_path: &str) -> Vec<String> {
        let key = self.path_key(file_path);
        let base = basename(&key).to_string();
        let candidates = match self.basename_to_paths.get(&base) {
            Some(c) => c,
            None => {
                tracing::debug!("SourceLocationIndex: no file named '{}'", base);
                return Vec::new();
            }
        };

        if candidates.contains(&key) {
            return vec![key];
        }

        if self.options.match_suffix {
            let suffixed: Vec<String> = candidates
                .iter()
                .filter(|p| path_ends_with(p, &key) || path_ends_with(&key, p))
                .cloned()
                .collect();
            if !suffixed.is_empty() {
                tracing::debug!(
                    "SourceLocationIndex: '{}' matched {:?} by suffix",
                    file_path,
                    suffixed
                );
                return suffixed;
            }
        }

        if self.options.match_basename && candidates.len() == 1 {
            tracing::debug!(
                "SourceLocationIndex: '{}' matched by unique basename '{}'",
                file_path,
                base
            );
            return candidates.iter().cloned().collect();
        }

        tracing::debug!(
            "SourceLocationIndex: '{}' is ambiguous or unknown ({} candidates)",
            file_path,
            candidates.len()
        );
        Vec::new()
    }

    /// Instruction offsets for a source position, ascending. Column 0 matches
    /// any column. Unknown files or lines give an empty result.
    pub fn instruction_offsets_from_location(
        &self,
        file_path: &str,
        line: u32,
        column: u32,
    ) -> Vec<InstructionOffset> {
        let mut offsets: Vec<InstructionOffset> = self
            .matching_paths(file_path)
            .into_iter()
            .filter_map(|path| self.path_line_to_entries.get(&(path, line)))
            .flatten()
            .map(|idx| &self.entries[*idx])
            .filter(|e| column == 0 || e.location.column == column)
            .map(|e| e.offset)
            .collect();
        offsets.sort_unstable();
        offsets.dedup();

        tracing::debug!(
            "SourceLocationIndex: {}:{}:{} -> {} offsets",
            file_path,
            line,
            column,
            offsets.len()
        );
        offsets
    }

    /// Distinct lines with code in a file, ascending
    pub fn lines_in_file(&self, file_path: &str) -> Vec<u32> {
        let paths = self.matching_paths(file_path);
        let lines: BTreeSet<u32> = self
            .path_line_to_entries
            .keys()
            .filter(|(p, _)| paths.contains(p))
            .map(|(_, line)| *line)
            .collect();
        lines.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(offset: u32, file: &str, line: u32, column: u32) -> LineEntry {
        LineEntry {
            offset,
            location: SourceLocation {
                file_path: file.to_string(),
                line,
                column,
            },
            callers: Vec::new(),
        }
    }

    fn sample(options: PathMatchOptions) -> SourceLocationIndex {
        SourceLocationIndex::from_entries(
            vec![
                entry(0, "/src/main.hlsl", 10, 5),
                entry(1, "/src/main.hlsl", 10, 12),
                entry(2, "/src/inc/light.hlsli", 3, 1),
                entry(3, "/src/main.hlsl", 11, 5),
                entry(4, "/other/inc/util.hlsli", 1, 1),
                entry(5, "/src/util.hlsli", 1, 1),
            ],
            options,
        )
    }

    #[test]
    fn test_column_zero_matches_any_column() {
        let index = sample(PathMatchOptions::default());
        assert_eq!(index.instruction_offsets_from_location("/src/main.hlsl", 10, 0), vec![0, 1]);
        assert_eq!(index.instruction_offsets_from_location("/src/main.hlsl", 10, 12), vec![1]);
        assert!(index.instruction_offsets_from_location("/src/main.hlsl", 99, 0).is_empty());
    }

    #[test]
    fn test_matching_strategies() {
        let index = sample(PathMatchOptions::default());
        assert_eq!(index.instruction_offsets_from_location("inc/light.hlsli", 3, 0), vec![2]);
        assert_eq!(index.instruction_offsets_from_location("light.hlsli", 3, 0), vec![2]);
        assert_eq!(index.instruction_offsets_from_location(r"\src\main.hlsl", 11, 0), vec![3]);
        // Basename shared by two files: suffix still resolves, bare name does not
        assert_eq!(index.instruction_offsets_from_location("inc/util.hlsli", 1, 0), vec![4]);
        assert!(index.instruction_offsets_from_location("nope.hlsl", 1, 0).is_empty());
    }

    #[test]
    fn test_case_insensitive_option() {
        let strict = sample(PathMatchOptions::default());
        assert!(strict.instruction_offsets_from_location("/SRC/Main.hlsl", 10, 0).is_empty());

        let relaxed = sample(PathMatchOptions {
            case_insensitive: true,
            ..Default::default()
        });
        assert_eq!(relaxed.instruction_offsets_from_location("/SRC/Main.hlsl", 10, 0), vec![0, 1]);
    }

    #[test]
    fn test_reverse_lookup_and_files() {
        let index = sample(PathMatchOptions::default());
        let locs = index.locations_from_instruction_offset(2);
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].file_path, "/src/inc/light.hlsli");
        assert!(index.locations_from_instruction_offset(42).is_empty());
        assert_eq!(index.files().len(), 4);
        assert_eq!(index.lines_in_file("main.hlsl"), vec![10, 11]);
    }
}
