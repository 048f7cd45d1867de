//! Byte level encoding of protocol messages.
//!
//! A message is a [`Header`] followed by a sequence of sections, each a `u64` element count and the raw bytes of
//! that many `Pod` records. Buffers are decoded without alignment assumptions.
use bytemuck::{Pod, Zeroable};

use crate::{
    fmm::types::{KernelKind, LennardJonesParameters, Particle, ParticleResult},
    traits::types::FmmError,
    tree::types::{CellIndex, CellTable, Domain},
};

const CELL_TABLE: u64 = 1;
const PARTICLES: u64 = 2;
const REQUESTS: u64 = 3;
const EXPANSIONS: u64 = 4;
const RESULTS: u64 = 5;
const SHUTDOWN: u64 = 6;

/// Fixed leading record of every message.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Header {
    /// Message kind.
    pub kind: u64,

    /// Cell table generation the payload refers to.
    pub generation: u64,

    /// Kind specific count.
    pub count: u64,

    /// Kind specific auxiliary value.
    pub aux: u64,
}

/// A particle on the wire.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ParticleRecord {
    /// Index in the driver's input.
    pub id: u64,

    /// Position.
    pub position: [f64; 3],

    /// Charge.
    pub charge: f64,

    /// Lennard-Jones `A_i`.
    pub repulsion: f64,

    /// Lennard-Jones `B_i`.
    pub dispersion: f64,

    /// 1 when the particle carries Lennard-Jones parameters.
    pub flags: u64,
}

/// A cell on the wire.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CellRecord {
    /// Level.
    pub level: u64,

    /// Morton index.
    pub morton: u64,
}

/// A particle result on the wire.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ResultRecord {
    /// Index in the driver's input.
    pub id: u64,

    /// Force.
    pub force: [f64; 3],

    /// Electrostatic potential.
    pub potential: f64,

    /// Energy share.
    pub energy: f64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
struct DomainRecord {
    origin: [f64; 3],
    side_length: [f64; 3],
    periodic: u64,
    nranks: u64,
}

impl From<&Particle> for ParticleRecord {
    fn from(particle: &Particle) -> Self {
        let lj = particle.lennard_jones.unwrap_or_default();
        Self {
            id: particle.id as u64,
            position: particle.position,
            charge: particle.charge,
            repulsion: lj.repulsion,
            dispersion: lj.dispersion,
            flags: particle.lennard_jones.is_some() as u64,
        }
    }
}

impl From<&ParticleRecord> for Particle {
    fn from(record: &ParticleRecord) -> Self {
        Self {
            id: record.id as usize,
            position: record.position,
            charge: record.charge,
            lennard_jones: (record.flags & 1 == 1).then_some(LennardJonesParameters {
                repulsion: record.repulsion,
                dispersion: record.dispersion,
            }),
        }
    }
}

impl From<&CellIndex> for CellRecord {
    fn from(cell: &CellIndex) -> Self {
        Self {
            level: cell.level as u64,
            morton: cell.morton,
        }
    }
}

impl From<&CellRecord> for CellIndex {
    fn from(record: &CellRecord) -> Self {
        Self {
            level: record.level as u32,
            morton: record.morton,
        }
    }
}

impl ResultRecord {
    /// Unwrap into a particle result.
    pub fn result(&self) -> ParticleResult {
        ParticleResult {
            force: self.force,
            potential: self.potential,
            energy: self.energy,
        }
    }
}

/// Partial results of one worker.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct WorkerResults {
    /// Description of a fault that invalidated the worker's step.
    pub fault: Option<String>,

    /// Number of owned cells at each level enclosing received particles.
    pub occupied_cells: Vec<u64>,

    /// Coulomb and Lennard-Jones energy of the owned particles.
    pub energies: [f64; 2],

    /// Virial contribution.
    pub virial: [[f64; 3]; 3],

    /// Owned particle results.
    pub records: Vec<ResultRecord>,
}

/// Protocol messages.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// A new cell table, replacing the previous one wholesale.
    CellTable(CellTable),

    /// Particles of a timestep: those in leaves owned by the receiver, and those in adjacent leaves owned elsewhere.
    Particles {
        /// Table generation.
        generation: u64,
        /// Owned particles.
        owned: Vec<Particle>,
        /// Ghost particles.
        ghosts: Vec<Particle>,
    },

    /// Cells whose multipole expansions the sender needs.
    Requests {
        /// Table generation.
        generation: u64,
        /// Kernel the expansions belong to.
        kernel: KernelKind,
        /// Requested cells.
        cells: Vec<CellIndex>,
    },

    /// Expansions, concatenated in the order of `cells`.
    Expansions {
        /// Table generation.
        generation: u64,
        /// Kernel the expansions belong to.
        kernel: KernelKind,
        /// Cells.
        cells: Vec<CellIndex>,
        /// Coefficients as raw doubles.
        coefficients: Vec<f64>,
    },

    /// Results of a worker.
    Results {
        /// Table generation.
        generation: u64,
        /// Payload.
        results: WorkerResults,
    },

    /// Ends the worker loop.
    Shutdown,
}

struct Encoder {
    buffer: Vec<u8>,
}

impl Encoder {
    fn new(header: Header) -> Self {
        Self {
            buffer: bytemuck::bytes_of(&header).to_vec(),
        }
    }

    fn section<T: Pod>(&mut self, records: &[T]) {
        self.buffer
            .extend_from_slice(bytemuck::bytes_of(&(records.len() as u64)));
        self.buffer
            .extend_from_slice(bytemuck::cast_slice(records));
    }

    fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

struct Decoder<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    fn take(&mut self, nbytes: usize) -> Result<&'a [u8], FmmError> {
        let end = self.offset.checked_add(nbytes).filter(|&e| e <= self.buffer.len());
        let Some(end) = end else {
            return Err(FmmError::Communication(format!(
                "truncated message, needed {nbytes} bytes at offset {} of {}",
                self.offset,
                self.buffer.len()
            )));
        };
        let bytes = &self.buffer[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn record<T: Pod>(&mut self) -> Result<T, FmmError> {
        let bytes = self.take(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    fn section<T: Pod>(&mut self) -> Result<Vec<T>, FmmError> {
        let count = self.record::<u64>()? as usize;
        let nbytes = count.checked_mul(std::mem::size_of::<T>()).ok_or_else(|| {
            FmmError::Communication(format!("section of {count} records overflows"))
        })?;
        Ok(bytemuck::pod_collect_to_vec(self.take(nbytes)?))
    }

    fn finish(self) -> Result<(), FmmError> {
        if self.offset == self.buffer.len() {
            Ok(())
        } else {
            Err(FmmError::Communication(format!(
                "{} trailing bytes after message",
                self.buffer.len() - self.offset
            )))
        }
    }
}

fn kernel_kind(tag: u64) -> Result<KernelKind, FmmError> {
    KernelKind::from_tag(tag)
        .ok_or_else(|| FmmError::Communication(format!("unknown kernel tag {tag}")))
}

impl Message {
    /// Short name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Message::CellTable(_) => "cell table",
            Message::Particles { .. } => "particles",
            Message::Requests { .. } => "requests",
            Message::Expansions { .. } => "expansions",
            Message::Results { .. } => "results",
            Message::Shutdown => "shutdown",
        }
    }

    /// Encode into a byte buffer.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::CellTable(table) => {
                let mut encoder = Encoder::new(Header {
                    kind: CELL_TABLE,
                    generation: table.generation,
                    count: table.levels as u64,
                    aux: 0,
                });
                encoder.section(&[DomainRecord {
                    origin: table.domain.origin,
                    side_length: table.domain.side_length,
                    periodic: table.periodic as u64,
                    nranks: table.nranks as u64,
                }]);
                for owners in table.owners.iter() {
                    encoder.section(owners.as_slice());
                }
                encoder.finish()
            }

            Message::Particles {
                generation,
                owned,
                ghosts,
            } => {
                let mut encoder = Encoder::new(Header {
                    kind: PARTICLES,
                    generation: *generation,
                    count: owned.len() as u64,
                    aux: ghosts.len() as u64,
                });
                encoder.section(&owned.iter().map(ParticleRecord::from).collect::<Vec<_>>());
                encoder.section(&ghosts.iter().map(ParticleRecord::from).collect::<Vec<_>>());
                encoder.finish()
            }

            Message::Requests {
                generation,
                kernel,
                cells,
            } => {
                let mut encoder = Encoder::new(Header {
                    kind: REQUESTS,
                    generation: *generation,
                    count: cells.len() as u64,
                    aux: kernel.tag(),
                });
                encoder.section(&cells.iter().map(CellRecord::from).collect::<Vec<_>>());
                encoder.finish()
            }

            Message::Expansions {
                generation,
                kernel,
                cells,
                coefficients,
            } => {
                let mut encoder = Encoder::new(Header {
                    kind: EXPANSIONS,
                    generation: *generation,
                    count: cells.len() as u64,
                    aux: kernel.tag(),
                });
                encoder.section(&cells.iter().map(CellRecord::from).collect::<Vec<_>>());
                encoder.section(coefficients.as_slice());
                encoder.finish()
            }

            Message::Results {
                generation,
                results,
            } => {
                let mut encoder = Encoder::new(Header {
                    kind: RESULTS,
                    generation: *generation,
                    count: results.records.len() as u64,
                    aux: results.fault.is_some() as u64,
                });
                encoder.section(results.fault.as_deref().unwrap_or("").as_bytes());
                encoder.section(&results.occupied_cells);
                encoder.section(&results.energies);
                encoder.section(std::slice::from_ref(&results.virial));
                encoder.section(&results.records);
                encoder.finish()
            }

            Message::Shutdown => Encoder::new(Header {
                kind: SHUTDOWN,
                generation: 0,
                count: 0,
                aux: 0,
            })
            .finish(),
        }
    }

    /// Decode a buffer produced by [`Message::encode`].
    pub fn decode(buffer: &[u8]) -> Result<Message, FmmError> {
        let mut decoder = Decoder { buffer, offset: 0 };
        let header = decoder.record::<Header>()?;

        let message = match header.kind {
            CELL_TABLE => {
                let records = decoder.section::<DomainRecord>()?;
                let [record] = records[..] else {
                    return Err(FmmError::Communication(
                        "cell table without a domain record".to_string(),
                    ));
                };
                let owners = (0..header.count)
                    .map(|_| decoder.section::<u32>())
                    .collect::<Result<Vec<_>, _>>()?;
                let table = CellTable {
                    generation: header.generation,
                    domain: Domain::new(&record.origin, &record.side_length),
                    levels: header.count as u32,
                    periodic: record.periodic == 1,
                    nranks: record.nranks as usize,
                    owners,
                };
                Message::CellTable(table)
            }

            PARTICLES => {
                let owned = decoder.section::<ParticleRecord>()?;
                let ghosts = decoder.section::<ParticleRecord>()?;
                Message::Particles {
                    generation: header.generation,
                    owned: owned.iter().map(Particle::from).collect(),
                    ghosts: ghosts.iter().map(Particle::from).collect(),
                }
            }

            REQUESTS => {
                let cells = decoder.section::<CellRecord>()?;
                Message::Requests {
                    generation: header.generation,
                    kernel: kernel_kind(header.aux)?,
                    cells: cells.iter().map(CellIndex::from).collect(),
                }
            }

            EXPANSIONS => {
                let cells = decoder.section::<CellRecord>()?;
                let coefficients = decoder.section::<f64>()?;
                Message::Expansions {
                    generation: header.generation,
                    kernel: kernel_kind(header.aux)?,
                    cells: cells.iter().map(CellIndex::from).collect(),
                    coefficients,
                }
            }

            RESULTS => {
                let fault = decoder.section::<u8>()?;
                let occupied_cells = decoder.section::<u64>()?;
                let energies = decoder.section::<f64>()?;
                let virial = decoder.section::<[[f64; 3]; 3]>()?;
                let records = decoder.section::<ResultRecord>()?;

                let (Ok(energies), [virial]) = (<[f64; 2]>::try_from(energies), &virial[..]) else {
                    return Err(FmmError::Communication(
                        "malformed energies or virial in results".to_string(),
                    ));
                };
                let virial = *virial;

                let fault = if header.aux == 1 {
                    Some(String::from_utf8_lossy(&fault).into_owned())
                } else {
                    None
                };

                Message::Results {
                    generation: header.generation,
                    results: WorkerResults {
                        fault,
                        occupied_cells,
                        energies,
                        virial,
                        records,
                    },
                }
            }

            SHUTDOWN => Message::Shutdown,

            kind => {
                return Err(FmmError::Communication(format!(
                    "unknown message kind {kind}"
                )))
            }
        };

        decoder.finish()?;
        Ok(message)
    }
}

/// Reinterpret expansion coefficients as raw doubles for an [`Message::Expansions`] payload.
pub fn coefficients_to_wire<T: Pod>(coefficients: &[T]) -> Vec<f64> {
    bytemuck::pod_collect_to_vec(bytemuck::cast_slice::<T, u8>(coefficients))
}

/// Inverse of [`coefficients_to_wire`].
pub fn coefficients_from_wire<T: Pod>(coefficients: &[f64]) -> Result<Vec<T>, FmmError> {
    let bytes = bytemuck::cast_slice::<f64, u8>(coefficients);
    if bytes.len() % std::mem::size_of::<T>() != 0 {
        return Err(FmmError::Communication(format!(
            "{} bytes of coefficients do not divide into records of {} bytes",
            bytes.len(),
            std::mem::size_of::<T>()
        )));
    }
    Ok(bytemuck::pod_collect_to_vec(bytes))
}
