use crate::domain::allocation::QuotaAllocation;
use crate::domain::ids::CompanyId;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

const HEADER: [&str; 5] = ["company", "product_type", "license_cnt", "use_cnt", "headroom"];

#[derive(Serialize)]
struct AllocationRow<'a> {
    company: CompanyId,
    product_type: &'a str,
    license_cnt: u32,
    use_cnt: u32,
    headroom: u32,
}

/// Writes the allocation report as CSV.
pub struct AllocationWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AllocationWriter<W> {
    pub fn new(sink: W) -> Self {
        let writer = csv::WriterBuilder::new().has_headers(false).from_writer(sink);
        Self { writer }
    }

    /// Writes the header followed by one row per allocation, even when there are none.
    pub fn write_allocations(&mut self, allocations: &[QuotaAllocation]) -> Result<()> {
        self.writer.write_record(HEADER)?;
        for allocation in allocations {
            self.writer.serialize(AllocationRow {
                company: allocation.key.company,
                product_type: allocation.key.product_type.as_str(),
                license_cnt: allocation.license_cnt,
                use_cnt: allocation.use_cnt,
                headroom: allocation.headroom(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::allocation::AllocationKey;
    use crate::domain::ids::ProductType;

    #[test]
    fn test_writes_rows_with_headroom() {
        let allocations = vec![QuotaAllocation {
            key: AllocationKey::new(CompanyId(1), ProductType::from("Bone Age")),
            license_cnt: 5,
            use_cnt: 2,
        }];
        let mut buffer = Vec::new();
        AllocationWriter::new(&mut buffer)
            .write_allocations(&allocations)
            .unwrap();

        let output = String::from_utf8(buffer).unwrap();
        assert_eq!(
            output,
            "company,product_type,license_cnt,use_cnt,headroom\n1,Bone Age,5,2,3\n"
        );
    }

    #[test]
    fn test_empty_report_has_header() {
        let mut buffer = Vec::new();
        AllocationWriter::new(&mut buffer).write_allocations(&[]).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "company,product_type,license_cnt,use_cnt,headroom\n"
        );
    }
}
