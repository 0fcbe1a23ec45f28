use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

pub const BASE_URL: &str = "https://files.zillowstatic.com/research/public_csvs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionType {
    Metro,
    State,
    County,
    City,
    Zip,
}

impl RegionType {
    pub const ALL: [RegionType; 5] = [
        RegionType::Metro,
        RegionType::State,
        RegionType::County,
        RegionType::City,
        RegionType::Zip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegionType::Metro => "metro",
            RegionType::State => "state",
            RegionType::County => "county",
            RegionType::City => "city",
            RegionType::Zip => "zip",
        }
    }

    /// Token substituted into source filenames.
    pub fn file_token(&self) -> &'static str {
        match self {
            RegionType::Metro => "Metro",
            RegionType::State => "State",
            RegionType::County => "County",
            RegionType::City => "City",
            RegionType::Zip => "Zip",
        }
    }

    /// Value of the source `RegionType` column that rows of this granularity carry.
    pub fn row_filter(&self) -> &'static str {
        match self {
            RegionType::Metro => "msa",
            RegionType::State => "state",
            RegionType::County => "county",
            RegionType::City => "city",
            RegionType::Zip => "zip",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RegionType::Metro => "Metro Area (MSA)",
            RegionType::State => "State",
            RegionType::County => "County",
            RegionType::City => "City",
            RegionType::Zip => "ZIP Code",
        }
    }

    pub fn has_parent_state(&self) -> bool {
        !matches!(self, RegionType::State)
    }
}

impl fmt::Display for RegionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RegionType {
    type Err = ConnectorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        RegionType::ALL
            .into_iter()
            .find(|region| region.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| ConnectorError::UnknownRegion(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatasetDescriptor {
    pub id: &'static str,
    pub folder: &'static str,
    pub filename_pattern: &'static str,
    pub description: &'static str,
}

impl DatasetDescriptor {
    pub fn filename(&self, region: RegionType) -> String {
        self.filename_pattern.replace("{region}", region.file_token())
    }

    pub fn url(&self, base_url: &str, region: RegionType) -> String {
        format!(
            "{}/{}/{}",
            base_url.trim_end_matches('/'),
            self.folder,
            self.filename(region)
        )
    }

    /// Raw store id and ingest state key for one granularity of this dataset.
    pub fn asset_id(&self, region: RegionType) -> String {
        format!("{}_{}", self.id, region.as_str())
    }
}

pub fn find_dataset(id: &str) -> Result<&'static DatasetDescriptor, ConnectorError> {
    DATASETS
        .iter()
        .find(|dataset| dataset.id == id)
        .ok_or_else(|| ConnectorError::UnknownDataset(id.to_string()))
}

pub static DATASETS: [DatasetDescriptor; 21] = [
    DatasetDescriptor {
        id: "zhvi_all_homes",
        folder: "zhvi",
        filename_pattern: "{region}_zhvi_uc_sfrcondo_tier_0.33_0.67_sm_sa_month.csv",
        description: "ZHVI All Homes (SFR + Condo) - Mid Tier",
    },
    DatasetDescriptor {
        id: "zhvi_sfr",
        folder: "zhvi",
        filename_pattern: "{region}_zhvi_uc_sfr_tier_0.33_0.67_sm_sa_month.csv",
        description: "ZHVI Single Family Residence - Mid Tier",
    },
    DatasetDescriptor {
        id: "zhvi_condo",
        folder: "zhvi",
        filename_pattern: "{region}_zhvi_uc_condo_tier_0.33_0.67_sm_sa_month.csv",
        description: "ZHVI Condo/Co-op - Mid Tier",
    },
    DatasetDescriptor {
        id: "zhvi_1bed",
        folder: "zhvi",
        filename_pattern: "{region}_zhvi_bdrmcnt_1_uc_sfrcondo_tier_0.33_0.67_sm_sa_month.csv",
        description: "ZHVI 1 Bedroom",
    },
    DatasetDescriptor {
        id: "zhvi_2bed",
        folder: "zhvi",
        filename_pattern: "{region}_zhvi_bdrmcnt_2_uc_sfrcondo_tier_0.33_0.67_sm_sa_month.csv",
        description: "ZHVI 2 Bedroom",
    },
    DatasetDescriptor {
        id: "zhvi_3bed",
        folder: "zhvi",
        filename_pattern: "{region}_zhvi_bdrmcnt_3_uc_sfrcondo_tier_0.33_0.67_sm_sa_month.csv",
        description: "ZHVI 3 Bedroom",
    },
    DatasetDescriptor {
        id: "zhvi_4bed",
        folder: "zhvi",
        filename_pattern: "{region}_zhvi_bdrmcnt_4_uc_sfrcondo_tier_0.33_0.67_sm_sa_month.csv",
        description: "ZHVI 4 Bedroom",
    },
    DatasetDescriptor {
        id: "zhvi_5bed_plus",
        folder: "zhvi",
        filename_pattern: "{region}_zhvi_bdrmcnt_5_uc_sfrcondo_tier_0.33_0.67_sm_sa_month.csv",
        description: "ZHVI 5+ Bedroom",
    },
    DatasetDescriptor {
        id: "zhvi_bottom_tier",
        folder: "zhvi",
        filename_pattern: "{region}_zhvi_uc_sfrcondo_tier_0.0_0.33_sm_sa_month.csv",
        description: "ZHVI Bottom Tier (5th-35th percentile)",
    },
    DatasetDescriptor {
        id: "zhvi_top_tier",
        folder: "zhvi",
        filename_pattern: "{region}_zhvi_uc_sfrcondo_tier_0.67_1.0_sm_sa_month.csv",
        description: "ZHVI Top Tier (65th-95th percentile)",
    },
    DatasetDescriptor {
        id: "zori",
        folder: "zori",
        filename_pattern: "{region}_zori_uc_sfrcondomfr_sm_sa_month.csv",
        description: "ZORI Observed Rent Index",
    },
    DatasetDescriptor {
        id: "inventory_for_sale",
        folder: "invt_fs",
        filename_pattern: "{region}_invt_fs_uc_sfrcondo_sm_month.csv",
        description: "For-Sale Inventory",
    },
    DatasetDescriptor {
        id: "new_listings",
        folder: "new_listings",
        filename_pattern: "{region}_new_listings_uc_sfrcondo_sm_month.csv",
        description: "New Listings Count",
    },
    DatasetDescriptor {
        id: "new_pending",
        folder: "new_pending",
        filename_pattern: "{region}_new_pending_uc_sfrcondo_sm_month.csv",
        description: "New Pending Sales",
    },
    DatasetDescriptor {
        id: "median_list_price",
        folder: "mlp",
        filename_pattern: "{region}_mlp_uc_sfrcondo_sm_month.csv",
        description: "Median List Price",
    },
    DatasetDescriptor {
        id: "median_sale_price",
        folder: "median_sale_price",
        filename_pattern: "{region}_median_sale_price_uc_sfrcondo_sm_sa_month.csv",
        description: "Median Sale Price",
    },
    DatasetDescriptor {
        id: "sales_count",
        folder: "sales_count_now",
        filename_pattern: "{region}_sales_count_now_uc_sfrcondo_month.csv",
        description: "Sales Count Nowcast",
    },
    DatasetDescriptor {
        id: "pct_sold_above_list",
        folder: "pct_sold_above_list",
        filename_pattern: "{region}_pct_sold_above_list_uc_sfrcondo_sm_month.csv",
        description: "Percent Sold Above List Price",
    },
    DatasetDescriptor {
        id: "pct_sold_below_list",
        folder: "pct_sold_below_list",
        filename_pattern: "{region}_pct_sold_below_list_uc_sfrcondo_sm_month.csv",
        description: "Percent Sold Below List Price",
    },
    DatasetDescriptor {
        id: "days_to_pending",
        folder: "mean_doz_pending",
        filename_pattern: "{region}_mean_doz_pending_uc_sfrcondo_sm_month.csv",
        description: "Mean Days to Pending",
    },
    DatasetDescriptor {
        id: "price_cut_share",
        folder: "perc_listings_price_cut",
        filename_pattern: "{region}_perc_listings_price_cut_uc_sfrcondo_sm_month.csv",
        description: "Percent of Listings with Price Cut",
    },
];
