//! DSP program loading and verification.
//!
//! Program words go to shared memory page 0, which both cores of a pair execute from. Each
//! word is written at its own address.
use crate::{
    board::Board,
    command::MemoryPage,
    core::DSP_LOAD_HANDSHAKE_INTERVAL,
    transport::Transport,
};
use anyhow::bail;
use tracing::{
    error,
    info,
};
use utboard_utils::program_sources::dsp::Program;

/// Outcome of verifying one core pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub blocks: usize,
    /// File positions of the blocks whose checksum didn't match, or that got no answer
    pub mismatched: Vec<usize>,
}

impl VerifyReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.mismatched.is_empty()
    }
}

/// A word that read back differently from the program
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WordMismatch {
    pub addr: u16,
    pub expected: u16,
    /// `None` when the read got no answer
    pub found: Option<u16>,
}

impl<T> Board<T>
where
    T: Transport,
{
    /// Write `program` into the shared memory of the core pair holding `core`
    /// # Errors
    /// Returns an error on transport failures or if the board stops answering the flow
    /// control status requests
    pub fn load_dsp_code(&mut self, chip: u8, core: u8, program: &Program) -> anyhow::Result<()> {
        info!(
            board = %self.identity,
            "Loading DSP code into chip {chip} core {core}, {} words", program.word_count()
        );
        let mut written = 0usize;
        for block in &program.blocks {
            for (addr, word) in block.addressed_words() {
                self.write_dsp_word(chip, core, MemoryPage::SHARED, addr, word)?;
                written += 1;
                if written % DSP_LOAD_HANDSHAKE_INTERVAL == 0 {
                    self.get_board_status()?;
                }
            }
        }
        Ok(())
    }

    /// Compare each block's sum against the board's checksum of the same words. A mismatch is
    /// logged and checking goes on with the next block.
    /// # Errors
    /// Returns an error on transport failures
    #[allow(clippy::cast_possible_truncation)]
    pub fn verify_dsp_code(&mut self, chip: u8, core: u8, program: &Program) -> anyhow::Result<VerifyReport> {
        let mut report = VerifyReport {
            blocks: program.blocks.len(),
            mismatched: vec![],
        };
        for block in &program.blocks {
            let size = block.words.len() as u16;
            let remote = self.dsp_block_checksum(chip, core, MemoryPage::SHARED, block.start, size)?;
            if remote != Some(block.checksum()) {
                error!(
                    board = %self.identity,
                    "DSP code error chip {chip} core {core} block {} at {:#06x}: expected {:#06x}, board has {}",
                    block.index,
                    block.start,
                    block.checksum(),
                    remote.map_or_else(|| "no answer".to_string(), |c| format!("{c:#06x}"))
                );
                report.mismatched.push(block.index);
            }
        }
        if report.passed() {
            info!(board = %self.identity, "DSP code verified on chip {chip} core {core}");
        }
        Ok(report)
    }

    /// Read back every word and compare. Slow, but names the exact addresses that differ.
    /// # Errors
    /// Returns an error on transport failures
    pub fn verify_dsp_code_by_word(
        &mut self,
        chip: u8,
        core: u8,
        program: &Program,
    ) -> anyhow::Result<Vec<WordMismatch>> {
        let mut mismatches = vec![];
        for block in &program.blocks {
            for (i, (addr, expected)) in block.addressed_words().enumerate() {
                let found = if i == 0 {
                    self.read_dsp_word(chip, core, MemoryPage::SHARED, addr)?
                } else {
                    self.read_next_dsp_word(chip, core)?
                };
                if found != Some(expected) {
                    error!(
                        board = %self.identity,
                        "DSP code error chip {chip} core {core} at {addr:#06x}"
                    );
                    mismatches.push(WordMismatch {
                        addr,
                        expected,
                        found,
                    });
                }
            }
        }
        Ok(mismatches)
    }

    /// Load, then verify, failing if any block is wrong
    /// # Errors
    /// Returns an error on transport failures or a failed verification
    pub fn load_and_verify_dsp_code(&mut self, chip: u8, core: u8, program: &Program) -> anyhow::Result<()> {
        self.load_dsp_code(chip, core, program)?;
        let report = self.verify_dsp_code(chip, core, program)?;
        if !report.passed() {
            bail!(
                "DSP chip {chip} core {core}: blocks {:?} failed verification",
                report.mismatched
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        board::tests::{
            program,
            sim_board,
        },
        core::{
            PacketId,
            SHARED_MEMORY,
        },
        transport::sim::Simulator,
    };
    use utboard_utils::program_sources::dsp::{
        parse_program,
        Block,
        Program,
    };

    fn long_program(words: usize) -> Program {
        #[allow(clippy::cast_possible_truncation)]
        let words = (0..words).map(|w| w as u16).collect();
        Program {
            blocks: vec![Block {
                index: 0,
                start: 0x200,
                words,
            }],
            md5: [0; 16],
            filename: "long.hex".into(),
        }
    }

    #[test]
    fn test_load_writes_shared_memory() {
        let mut board = sim_board(Simulator::with_greeting(""));
        board.load_dsp_code(1, 3, &program()).unwrap();
        let sim = board.transport_mut();
        assert_eq!(sim.peek(1, 4, SHARED_MEMORY, 0x0000), 1);
        assert_eq!(sim.peek(1, 4, SHARED_MEMORY, 0x0002), 3);
        assert_eq!(sim.peek(1, 3, SHARED_MEMORY, 0x0100), 0x1234);
        // The other pair is untouched
        assert_eq!(sim.peek(1, 1, SHARED_MEMORY, 0x0100), 0);
    }

    #[test]
    fn test_every_word_addressed() {
        let mut board = sim_board(Simulator::with_greeting(""));
        board.load_dsp_code(1, 1, &program()).unwrap();
        let writes: Vec<_> = board
            .transport_mut()
            .commands()
            .iter()
            .map(|c| (c[0], u16::from_be_bytes([c[4], c[5]])))
            .collect();
        let write = PacketId::WriteDsp as u8;
        assert_eq!(
            writes,
            vec![(write, 0x0000), (write, 0x0001), (write, 0x0002), (write, 0x0100)]
        );
    }

    #[test]
    fn test_mismatch_names_file_block() {
        let mut board = sim_board(Simulator::with_greeting(""));
        let program =
            parse_program(b"\x02$A0000 0001 $A0010 $A0020 0005\x03", "gap.hex".into()).unwrap();
        board.load_dsp_code(1, 1, &program).unwrap();
        board.transport_mut().poke(1, 1, SHARED_MEMORY, 0x0020, 0);
        let report = board.verify_dsp_code(1, 1, &program).unwrap();
        assert_eq!(report.blocks, 2);
        assert_eq!(report.mismatched, vec![2]);
    }

    #[test]
    fn test_flow_control_every_hundred_words() {
        let mut board = sim_board(Simulator::with_greeting(""));
        board.load_dsp_code(2, 1, &long_program(250)).unwrap();
        let status_requests = board
            .transport_mut()
            .commands()
            .iter()
            .filter(|c| c[0] == PacketId::GetStatus as u8)
            .count();
        assert_eq!(status_requests, 2);
    }

    #[test]
    fn test_checksum_match_and_mismatch() {
        let mut board = sim_board(Simulator::with_greeting(""));
        let program = program();
        board.load_dsp_code(2, 3, &program).unwrap();
        assert!(board.verify_dsp_code(2, 3, &program).unwrap().passed());

        board.transport_mut().poke(2, 3, SHARED_MEMORY, 0x0001, 0x0009);
        let report = board.verify_dsp_code(2, 4, &program).unwrap();
        assert_eq!(report.blocks, 2);
        assert_eq!(report.mismatched, vec![0]);
        assert!(board.load_and_verify_dsp_code(1, 1, &program).is_ok());
    }

    #[test]
    fn test_word_verify_names_address() {
        let mut board = sim_board(Simulator::with_greeting(""));
        let program = program();
        board.load_dsp_code(1, 1, &program).unwrap();
        board.transport_mut().poke(1, 1, SHARED_MEMORY, 0x0002, 0);
        let bad = board.verify_dsp_code_by_word(1, 2, &program).unwrap();
        assert_eq!(
            bad,
            vec![WordMismatch {
                addr: 0x0002,
                expected: 3,
                found: Some(0)
            }]
        );
    }
}
