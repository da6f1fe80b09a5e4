/*!
Control the appearance of simulation result data

# Working with [`ResultsBuilder`]

## Examples

Creating a [`ResultsTable`] after running a simulation group:

```
use propagation_sim::prelude::*;

let sim = SimulationBuilder::new()
    .network(Network::fully_connected(5))
    .election(Uniform::new())
    .fork_choice(ForkChoice::Ghost)
    .block_discoveries(20)
    .repeat_all(3)
    .seed(7)
    .build()
    .unwrap();

let results_builder = sim.run_all().unwrap();

let results = results_builder
    .average(Average::Median) // Median of repeated simulations' results
    .uncles()                 // Number of uncles per simulation
    .uncle_rate()
    .format(Format::CSV)      // Output results as CSV
    .build();

println!("{}", results);
```

# Aggregating Results

Columns whose value differs between repeated runs (uncles, chain length,
delays) are aggregated using the chosen [`Average`]. All other columns take
the value of the first run of the group.
*/

use std::{collections::BTreeSet, fmt::Display, num::NonZeroUsize};

use crate::{
    simulation::SimulationOutput,
    utils::{mean_of_floats, median_of_floats, wrap, WrapFunc},
};

/// Floating point precision of results data.
pub const FLOAT_PRECISION_DIGITS: usize = 6;

/// Builder for [`ResultsTable`]. Typically produced by running a
/// [`SimulationGroup`](crate::simulation::SimulationGroup).
#[derive(Debug, Clone)]
pub struct ResultsBuilder {
    average: Average,
    columns: BTreeSet<Column>,
    data: Vec<SimulationOutput>,
    format: Format,
    repeated: NonZeroUsize,
}

/// Describes the appearance of a [`ResultsTable`] table as given by its
/// [`Display`] implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    /// Comma-separated, without extra whitespace.
    CSV,
    /// Human-readable.
    #[default]
    PrettyPrint,
}

impl ResultsBuilder {
    /// Create a new [`ResultsBuilder`] over `data`, in which each run of
    /// `repeated` consecutive outputs shares one configuration.
    pub fn new(data: Vec<SimulationOutput>, repeated: NonZeroUsize) -> Self {
        Self {
            data,
            repeated,
            average: Average::default(),
            columns: BTreeSet::default(),
            format: Format::default(),
        }
    }

    /// Include every built-in data column.
    ///
    /// [`ResultsBuilder::average`] must still be called separately
    /// to create averaged data.
    pub fn all(self) -> Self {
        self.seed()
            .peers()
            .block_time()
            .block_discoveries()
            .blocks_mined()
            .uncles()
            .uncle_rate()
            .canonical_chain_length()
            .mean_reception_delay()
    }

    /// Average the results of repeated simulations based on the given
    /// [`Average`] type. For types other than [`Average::None`], a column
    /// describing the averaging method will be included in the results table.
    pub fn average(mut self, average: Average) -> Self {
        self.average = average;

        self
    }

    /// Include the "Seed" column in the results table.
    pub fn seed(mut self) -> Self {
        self.columns.insert(Column::Seed);

        self
    }

    /// Include the "Peers" column in the results table.
    pub fn peers(mut self) -> Self {
        self.columns.insert(Column::Peers);

        self
    }

    /// Include the "Block Time" column in the results table.
    pub fn block_time(mut self) -> Self {
        self.columns.insert(Column::BlockTime);

        self
    }

    /// Include the "Block Discoveries" column in the results table.
    pub fn block_discoveries(mut self) -> Self {
        self.columns.insert(Column::BlockDiscoveries);

        self
    }

    /// Include the "Blocks Mined" column in the results table.
    pub fn blocks_mined(mut self) -> Self {
        self.columns.insert(Column::BlocksMined);

        self
    }

    /// Include the "Uncles" column in the results table.
    pub fn uncles(mut self) -> Self {
        self.columns.insert(Column::Uncles);

        self
    }

    /// Include the "Uncle Rate" column in the results table.
    pub fn uncle_rate(mut self) -> Self {
        self.columns.insert(Column::UncleRate);

        self
    }

    /// Include the "Canonical Chain Length" column in the results table.
    pub fn canonical_chain_length(mut self) -> Self {
        self.columns.insert(Column::CanonicalChainLength);

        self
    }

    /// Include the "Mean Reception Delay" column in the results table.
    pub fn mean_reception_delay(mut self) -> Self {
        self.columns.insert(Column::MeanReceptionDelay);

        self
    }

    /// Include a column with title `title` which only contains the given
    /// value.
    pub fn constant<T>(mut self, title: T, value: f64) -> Self
    where
        T: Into<String>,
    {
        self.columns.insert(Column::Constant(wrap!(title, move |_| value)));

        self
    }

    /// Present the output of `func` on each [`SimulationOutput`] in a table
    /// column with the given title. The column is averaged like the built-in
    /// data columns.
    pub fn output_func<T, F>(mut self, title: T, func: F) -> Self
    where
        T: Into<String>,
        F: Fn(&SimulationOutput) -> f64 + Send + Sync + 'static,
    {
        self.columns.insert(Column::OutputFunction(wrap!(title, func)));

        self
    }

    /// Extract the raw [`SimulationOutput`] data from this [`ResultsBuilder`].
    /// Useful for running custom statistical analysis.
    ///
    /// # Ordering
    /// Outputs are ordered by repeat index, so the `i`-th output was seeded
    /// with the group's seed plus `i`.
    pub fn data(self) -> Vec<SimulationOutput> {
        self.data
    }

    /// Specify the [`Format`] of the results table.
    pub fn format(mut self, format: Format) -> Self {
        self.format = format;

        self
    }

    /// Create new [`ResultsTable`].
    pub fn build(self) -> ResultsTable {
        let ResultsBuilder {
            average,
            mut columns,
            data,
            format,
            repeated,
        } = self;

        columns.insert(Column::Election);
        columns.insert(Column::ForkChoice);
        if average != Average::None {
            columns.insert(Column::AverageOf(average));
        }

        let columns = Vec::from_iter(columns);
        let rows = match average {
            Average::None => data
                .iter()
                .map(|output| {
                    columns.iter().map(|col| col.get_value(output)).collect()
                })
                .collect(),
            _ => data
                .chunks(repeated.get())
                .map(|outputs| {
                    columns
                        .iter()
                        .map(|col| col.get_average_value(average, outputs))
                        .collect()
                })
                .collect(),
        };

        ResultsTable { columns, format, rows }
    }
}

/// Formatted results from the completion of a
/// [`SimulationGroup`](crate::simulation::SimulationGroup). The results table
/// is given by the struct's [`Display`] implementation, as specified by
/// its [`Format`].
#[derive(Debug, Clone)]
pub struct ResultsTable {
    columns: Vec<Column>,
    format: Format,
    rows: Vec<Vec<ColumnValue>>,
}

impl ResultsTable {
    const SEPARATOR_VERTICAL: char = '|';
    const SEPARATOR_HORIZONTAL: char = '-';

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    /// Number of data rows, excluding the title row.
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

impl Display for ResultsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let titles: Vec<_> =
            self.columns.iter().map(|col| col.to_string()).collect();

        match self.format {
            Format::CSV => {
                write!(f, "{}", titles.join(","))?;

                for row in self.rows.iter() {
                    writeln!(f)?;

                    let row: Vec<_> =
                        row.iter().map(|val| val.to_string()).collect();

                    write!(f, "{}", row.join(","))?;
                }
            }
            Format::PrettyPrint => {
                let mut text_widths: Vec<_> =
                    titles.iter().map(|title| title.len()).collect();

                for row in self.rows.iter() {
                    for (i, val) in row.iter().enumerate() {
                        let width = val.to_string().len();
                        text_widths[i] = text_widths[i].max(width);
                    }
                }

                for (i, title) in titles.into_iter().enumerate() {
                    write!(
                        f,
                        " {:1$} {2}",
                        title,
                        text_widths[i],
                        Self::SEPARATOR_VERTICAL
                    )?;
                }
                writeln!(f)?;

                let total_width = text_widths.iter().map(|x| x + 3).sum();
                for _ in 0..total_width {
                    write!(f, "{}", Self::SEPARATOR_HORIZONTAL)?;
                }

                for row in self.rows.iter() {
                    writeln!(f)?;

                    for (i, val) in row.iter().enumerate() {
                        write!(
                            f,
                            " {:1$} {2}",
                            val.to_string(),
                            text_widths[i],
                            Self::SEPARATOR_VERTICAL
                        )?;
                    }
                }
            }
        }

        Ok(())
    }
}

/// Methods of extracting an average/central value from a set of repeated
/// simulations.
///
/// In the process of creating an results table, the given averaging method is
/// only applied to the values of columns which change between runs.
#[repr(u8)]
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Average {
    #[default]
    /// Include all repeated values.
    None,
    /// Arithmetic mean of all values.
    Mean,
    /// Median of all values.
    Median,
    /// Maximum of all values.
    Max,
    /// Minimum of all values.
    Min,
}

/// Type of column that can appear in a data table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Column {
    // Variant order determines the order of columns in results tables:
    // https://doc.rust-lang.org/stable/std/cmp/trait.PartialOrd.html#derivable
    Seed,
    Election,
    ForkChoice,
    Peers,
    BlockTime,
    Constant(WrapFunc<(), f64>),
    AverageOf(Average),
    BlockDiscoveries,
    BlocksMined,
    Uncles,
    UncleRate,
    CanonicalChainLength,
    MeanReceptionDelay,
    OutputFunction(WrapFunc<SimulationOutput, f64>),
}

/// Value which corresponds to a [`Column`].
#[derive(Debug, Clone, PartialEq)]
enum ColumnValue {
    Text(String),
    Count(u64),
    Float(f64),
}

impl Column {
    /// True for columns whose value is aggregated over repeated runs.
    fn varies(&self) -> bool {
        matches!(
            self,
            Self::BlocksMined
                | Self::Uncles
                | Self::UncleRate
                | Self::CanonicalChainLength
                | Self::MeanReceptionDelay
                | Self::OutputFunction(_)
        )
    }

    /// Numeric value of a column which varies between runs.
    fn metric(&self, output: &SimulationOutput) -> f64 {
        match self {
            Self::BlocksMined => output.blocks_mined as f64,
            Self::Uncles => output.uncles as f64,
            Self::UncleRate => output.uncle_rate(),
            Self::CanonicalChainLength => {
                output.canonical_chain_length() as f64
            }
            Self::MeanReceptionDelay => output.mean_reception_delay(),
            Self::OutputFunction(func) => func.call(output),
            _ => unreachable!("{} is the same for every run", self),
        }
    }

    fn get_value(&self, output: &SimulationOutput) -> ColumnValue {
        match self {
            Self::Seed => ColumnValue::Count(output.seed),
            Self::Election => ColumnValue::Text(output.election.clone()),
            Self::ForkChoice => {
                ColumnValue::Text(output.fork_choice.to_string())
            }
            Self::Peers => {
                ColumnValue::Count(output.network.node_count() as u64)
            }
            Self::BlockTime => {
                ColumnValue::Float(output.block_time.unwrap_or(f64::NAN))
            }
            Self::Constant(func) => ColumnValue::Float(func.call(&())),
            Self::BlockDiscoveries => {
                ColumnValue::Count(output.block_discoveries as u64)
            }
            Self::BlocksMined | Self::Uncles | Self::CanonicalChainLength => {
                ColumnValue::Count(self.metric(output) as u64)
            }
            Self::UncleRate
            | Self::MeanReceptionDelay
            | Self::OutputFunction(_) => {
                ColumnValue::Float(self.metric(output))
            }
            Self::AverageOf(_) => unreachable!(
                "never need the single value of the average descriptor column"
            ),
        }
    }

    fn get_average_value(
        &self,
        method: Average,
        data: &[SimulationOutput],
    ) -> ColumnValue {
        if let Self::AverageOf(_) = self {
            return ColumnValue::Count(data.len() as u64);
        }
        if !self.varies() {
            return self.get_value(&data[0]);
        }

        let vls: Vec<_> =
            data.iter().map(|output| self.metric(output)).collect();
        let avg = match method {
            Average::Mean => mean_of_floats(vls),
            Average::Median => median_of_floats(vls),
            Average::Max => vls.into_iter().fold(f64::NAN, f64::max),
            Average::Min => vls.into_iter().fold(f64::NAN, f64::min),
            Average::None => unreachable!(),
        };

        ColumnValue::Float(avg)
    }
}

impl Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AverageOf(method) => match method {
                Average::Mean => write!(f, "Mean Of"),
                Average::Median => write!(f, "Median Of"),
                Average::Max => write!(f, "Max Of"),
                Average::Min => write!(f, "Min Of"),
                Average::None => unreachable!(),
            },
            Self::Seed => write!(f, "Seed"),
            Self::Election => write!(f, "Election"),
            Self::ForkChoice => write!(f, "Fork Choice"),
            Self::Peers => write!(f, "Peers"),
            Self::BlockTime => write!(f, "Block Time"),
            Self::Constant(func) => write!(f, "{}", func.name()),
            Self::OutputFunction(func) => write!(f, "{}", func.name()),
            Self::BlockDiscoveries => write!(f, "Block Discoveries"),
            Self::BlocksMined => write!(f, "Blocks Mined"),
            Self::Uncles => write!(f, "Uncles"),
            Self::UncleRate => write!(f, "Uncle Rate"),
            Self::CanonicalChainLength => write!(f, "Canonical Chain Length"),
            Self::MeanReceptionDelay => write!(f, "Mean Reception Delay"),
        }
    }
}

impl Display for ColumnValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{}", text),
            Self::Count(count) => write!(f, "{}", count),
            Self::Float(value) => {
                write!(f, "{:.1$}", value, FLOAT_PRECISION_DIGITS)
            }
        }
    }
}
