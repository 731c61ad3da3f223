//! Reader syntax tables.
//!
//! A readtable classifies each 7-bit character code and optionally carries
//! dispatch-macro tables for some characters. The reader itself lives outside
//! this crate; the heap only stores the table and traces the dispatch
//! functions it refers to.

use crate::object::ObjRef;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

/// Number of character codes a readtable classifies.
pub const READTABLE_SIZE: usize = 128;

/// Syntax class of a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntaxType {
    /// Part of a token
    Constituent,
    /// Separates tokens
    Whitespace,
    /// Reader macro that ends a token
    TerminatingMacro,
    /// Reader macro allowed inside a token
    NonTerminatingMacro,
    /// Escapes the next character
    SingleEscape,
    /// Escapes everything up to the matching character
    MultipleEscape,
    /// Signals a reader error
    Invalid,
}

/// A 128-entry syntax table plus per-character dispatch-macro tables.
pub struct Readtable {
    syntax: RwLock<[SyntaxType; READTABLE_SIZE]>,
    dispatch: RwLock<HashMap<u8, HashMap<char, ObjRef>>>,
}

fn code(ch: char) -> Option<usize> {
    let code = ch as usize;
    (code < READTABLE_SIZE).then_some(code)
}

impl Readtable {
    /// Creates a table in which every character is a constituent.
    pub fn new() -> Self {
        Readtable {
            syntax: RwLock::new([SyntaxType::Constituent; READTABLE_SIZE]),
            dispatch: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a table with the standard Common Lisp syntax.
    ///
    /// `#` is a non-terminating dispatch character with an empty table.
    pub fn standard() -> Self {
        let readtable = Readtable::new();
        {
            let mut syntax = readtable.syntax.write();
            for ch in ['\t', '\n', '\x0c', '\r', ' '] {
                syntax[ch as usize] = SyntaxType::Whitespace;
            }
            for ch in ['"', '\'', '(', ')', ',', ';', '`'] {
                syntax[ch as usize] = SyntaxType::TerminatingMacro;
            }
            syntax[b'#' as usize] = SyntaxType::NonTerminatingMacro;
            syntax[b'\\' as usize] = SyntaxType::SingleEscape;
            syntax[b'|' as usize] = SyntaxType::MultipleEscape;
            syntax[0x08] = SyntaxType::Invalid;
            syntax[0x7f] = SyntaxType::Invalid;
        }
        readtable.dispatch.write().insert(b'#', HashMap::new());
        readtable
    }

    /// Returns the syntax class of `ch`.
    ///
    /// Characters outside the table are constituents.
    pub fn syntax_type(&self, ch: char) -> SyntaxType {
        match code(ch) {
            Some(code) => self.syntax.read()[code],
            None => SyntaxType::Constituent,
        }
    }

    /// Sets the syntax class of `ch`. Returns false if `ch` is outside the table.
    pub fn set_syntax_type(&self, ch: char, syntax: SyntaxType) -> bool {
        match code(ch) {
            Some(code) => {
                self.syntax.write()[code] = syntax;
                true
            }
            None => false,
        }
    }

    /// Returns true if `ch` has a dispatch-macro table.
    pub fn is_dispatch_macro_character(&self, ch: char) -> bool {
        code(ch).is_some_and(|code| self.dispatch.read().contains_key(&(code as u8)))
    }

    /// Turns `ch` into a dispatch-macro character with an empty table.
    ///
    /// An existing table for `ch` is cleared. Returns false if `ch` is outside
    /// the table.
    pub fn make_dispatch_macro_character(&self, ch: char, non_terminating: bool) -> bool {
        let Some(code) = code(ch) else {
            return false;
        };
        self.syntax.write()[code] = if non_terminating {
            SyntaxType::NonTerminatingMacro
        } else {
            SyntaxType::TerminatingMacro
        };
        self.dispatch.write().insert(code as u8, HashMap::new());
        true
    }

    /// Returns the number of sub-characters bound under `disp_char`.
    pub fn dispatch_len(&self, disp_char: char) -> usize {
        code(disp_char)
            .and_then(|code| self.dispatch.read().get(&(code as u8)).map(HashMap::len))
            .unwrap_or(0)
    }

    pub(crate) fn dispatch_function(&self, disp_char: char, sub_char: char) -> Option<ObjRef> {
        let code = code(disp_char)?;
        self.dispatch
            .read()
            .get(&(code as u8))?
            .get(&sub_char.to_ascii_uppercase())
            .copied()
    }

    /// Binds `function` and returns the previous binding.
    ///
    /// `Err(())` means `disp_char` is not a dispatch-macro character.
    pub(crate) fn set_dispatch_function(
        &self,
        disp_char: char,
        sub_char: char,
        function: Option<ObjRef>,
    ) -> Result<Option<ObjRef>, ()> {
        let code = code(disp_char).ok_or(())?;
        let mut dispatch = self.dispatch.write();
        let table = dispatch.get_mut(&(code as u8)).ok_or(())?;
        let sub_char = sub_char.to_ascii_uppercase();
        Ok(match function {
            Some(function) => table.insert(sub_char, function),
            None => table.remove(&sub_char),
        })
    }

    pub(crate) fn for_each_function(&self, mut visit: impl FnMut(ObjRef)) {
        for table in self.dispatch.read().values() {
            table.values().copied().for_each(&mut visit);
        }
    }
}

impl Default for Readtable {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for Readtable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dispatch: Vec<char> = self
            .dispatch
            .read()
            .keys()
            .map(|code| *code as char)
            .collect();
        f.debug_struct("Readtable")
            .field("dispatch_characters", &dispatch)
            .finish()
    }
}
